use axum::routing::{get, put};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Mount job routes.
///
/// ```text
/// PUT  /startjob/{job_id}/     start_job
/// GET  /jobstatus/{job_id}/    job_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/startjob/{job_id}/", put(jobs::start_job))
        .route("/startjob/{job_id}", put(jobs::start_job))
        .route("/jobstatus/{job_id}/", get(jobs::job_status))
        .route("/jobstatus/{job_id}", get(jobs::job_status))
}
