pub mod health;
pub mod jobs;
pub mod server;

use axum::Router;

use crate::state::AppState;

/// Build the dispatch route tree.
///
/// Route hierarchy:
///
/// ```text
/// /serverstatus                 backend reachability (GET, ?gpu=N)
/// /startjob/{job_id}/           submit workflow (PUT, ?gpu=N)
/// /jobstatus/{job_id}/          job record (GET)
/// ```
///
/// The job routes also match without the trailing slash.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(server::router())
        .merge(jobs::router())
}
