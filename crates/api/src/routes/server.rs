use axum::routing::get;
use axum::Router;

use crate::handlers::server;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/serverstatus", get(server::server_status))
}
