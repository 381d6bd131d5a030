//! Handler for backend reachability (`/serverstatus`).

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use cylindria_comfyui::prober::HealthReport;
use serde::Serialize;

use crate::error::AppResult;
use crate::handlers::{gpu_query, GpuQuery};
use crate::middleware::auth::ApiKey;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServerStatusResponse {
    /// `ok` when every probed device answered, otherwise `degraded`.
    pub status: &'static str,
    pub comfy_url: String,
    pub reachable: bool,
    pub devices: Vec<HealthReport>,
}

/// GET /serverstatus
///
/// Probes one device when `?gpu=N` is given, otherwise all of them
/// concurrently.
pub async fn server_status(
    _key: ApiKey,
    State(state): State<AppState>,
    query: Result<Query<GpuQuery>, QueryRejection>,
) -> AppResult<Json<ServerStatusResponse>> {
    let query = gpu_query(query)?;
    let dispatcher = &state.dispatcher;

    let (comfy_url, devices) = match query.gpu {
        Some(gpu) => {
            let report = dispatcher.health(gpu).await?;
            (report.url.clone(), vec![report])
        }
        None => (
            dispatcher.config().base_url.to_string(),
            dispatcher.health_all().await,
        ),
    };

    let reachable = devices.iter().all(|d| d.reachable);
    Ok(Json(ServerStatusResponse {
        status: if reachable { "ok" } else { "degraded" },
        comfy_url,
        reachable,
        devices,
    }))
}
