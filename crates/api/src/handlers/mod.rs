pub mod jobs;
pub mod server;

use axum::extract::rejection::QueryRejection;
use axum::extract::Query;
use cylindria_core::types::DeviceIndex;
use serde::Deserialize;

use crate::error::AppError;

/// Optional `?gpu=N` selector shared by several routes.
#[derive(Debug, Default, Deserialize)]
pub struct GpuQuery {
    pub gpu: Option<DeviceIndex>,
}

/// Turn a query-string rejection into a JSON 400.
pub fn gpu_query(query: Result<Query<GpuQuery>, QueryRejection>) -> Result<GpuQuery, AppError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}
