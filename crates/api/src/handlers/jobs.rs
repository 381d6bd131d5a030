//! Handlers for job submission and status.
//!
//! Both endpoints require the [`ApiKey`] when one is configured.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use cylindria_core::error::CoreError;
use cylindria_core::job::JobRecord;
use cylindria_core::types::DeviceIndex;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::handlers::{gpu_query, GpuQuery};
use crate::middleware::auth::ApiKey;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: String,
    pub gpu: DeviceIndex,
    pub accepted: bool,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// PUT /startjob/{job_id}/
///
/// Records the job and forwards the JSON workflow in the body to the
/// backend for `?gpu=N` (default 0). A backend that is down or refuses the
/// workflow still yields 200 with `accepted = false`.
pub async fn start_job(
    _key: ApiKey,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    query: Result<Query<GpuQuery>, QueryRejection>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> AppResult<Json<StartJobResponse>> {
    let gpu = gpu_query(query)?.gpu.unwrap_or(0);
    let Json(workflow) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let result = state.dispatcher.submit(&job_id, gpu, &workflow).await?;

    tracing::info!(
        job_id = %job_id,
        gpu,
        accepted = result.accepted,
        "Job submitted",
    );

    Ok(Json(StartJobResponse {
        job_id,
        gpu,
        accepted: result.accepted,
        detail: result.detail,
    }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /jobstatus/{job_id}/
pub async fn job_status(
    _key: ApiKey,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobRecord>> {
    state
        .dispatcher
        .status(&job_id)
        .map(Json)
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }))
}
