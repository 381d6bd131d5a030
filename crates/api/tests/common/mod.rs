#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::post;
use axum::{Json, Router};
use cylindria_api::config::ServerConfig;
use cylindria_api::router::build_app_router;
use cylindria_api::state::AppState;
use cylindria_comfyui::config::DispatcherConfig;
use cylindria_comfyui::manager::Dispatcher;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use url::Url;

pub const TEST_API_KEY: &str = "test-key";

/// Build a test `ServerConfig` pointing at `base_url`.
///
/// Timeouts are short so that requests against a closed port fail fast.
pub fn test_config(base_url: Url, gpus: usize, api_key: Option<&str>) -> ServerConfig {
    let mut dispatcher = DispatcherConfig::new(base_url, gpus);
    dispatcher.forward_timeout = Duration::from_millis(500);
    dispatcher.probe_timeout = Duration::from_millis(500);

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        api_key: api_key.map(str::to_string),
        dispatcher,
    }
}

/// Build the full application router with the production middleware
/// stack. No listeners are started, so tests only see what they submit.
pub fn build_test_app(config: ServerConfig) -> (Router, Arc<Dispatcher>) {
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone()).unwrap());
    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher: Arc::clone(&dispatcher),
    };
    (build_app_router(state, &config), dispatcher)
}

/// An `http://127.0.0.1:<port>` address nothing listens on.
pub fn closed_port_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}

/// Spawn a minimal ComfyUI stand-in answering `/prompt` and
/// `/system_stats`, returning its address.
pub async fn spawn_backend() -> Url {
    let app = Router::new()
        .route(
            "/prompt",
            post(|| async { Json(json!({"prompt_id": "prompt-1", "number": 1})) }),
        )
        .route("/system_stats", axum::routing::get(|| async { Json(json!({"system": {}})) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn get_with_key(app: Router, uri: &str, key: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("x-api-key", key)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
