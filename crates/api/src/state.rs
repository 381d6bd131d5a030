use std::sync::Arc;

use cylindria_comfyui::manager::Dispatcher;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (API key, timeouts).
    pub config: Arc<ServerConfig>,
    /// Job dispatcher over the configured ComfyUI backends.
    pub dispatcher: Arc<Dispatcher>,
}
