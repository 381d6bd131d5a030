//! Shared test helpers: an in-process fake ComfyUI backend.
//!
//! The fake serves `/prompt`, `/queue`, `/history/{id}`, `/system_stats`
//! and a `/ws` event stream. Tests push frames to every connected stream
//! through [`FakeBackend::send_text`] / [`FakeBackend::close_streams`].
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cylindria_comfyui::config::DispatcherConfig;
use cylindria_comfyui::reconnect::ReconnectConfig;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use url::Url;

/// A frame pushed to connected event streams.
#[derive(Debug, Clone)]
pub enum FakeFrame {
    Text(String),
    Close,
}

#[derive(Debug)]
pub struct FakeState {
    frames: broadcast::Sender<FakeFrame>,
    connections: AtomicUsize,
    prompts_received: AtomicUsize,
    reject_prompts: AtomicBool,
    healthy: AtomicBool,
    bodies: Mutex<Vec<Value>>,
    queue: Mutex<Value>,
    history: Mutex<HashMap<String, Value>>,
    history_delay_ms: AtomicU64,
}

pub struct FakeBackend {
    pub url: Url,
    pub state: Arc<FakeState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let (frames, _) = broadcast::channel(64);
        let state = Arc::new(FakeState {
            frames,
            connections: AtomicUsize::new(0),
            prompts_received: AtomicUsize::new(0),
            reject_prompts: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            bodies: Mutex::new(Vec::new()),
            queue: Mutex::new(json!({"queue_running": [], "queue_pending": []})),
            history: Mutex::new(HashMap::new()),
            history_delay_ms: AtomicU64::new(0),
        });

        let app = Router::new()
            .route("/prompt", post(submit_prompt))
            .route("/queue", get(queue))
            .route("/history/{prompt_id}", get(history))
            .route("/system_stats", get(system_stats))
            .route("/ws", get(event_stream))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: Url::parse(&format!("http://{addr}")).unwrap(),
            state,
            server,
        }
    }

    /// Send a text frame to every open event stream.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.state.frames.send(FakeFrame::Text(text.into()));
    }

    pub fn send_event(&self, event: Value) {
        self.send_text(event.to_string());
    }

    /// Close every open event stream from the server side.
    pub fn close_streams(&self) {
        let _ = self.state.frames.send(FakeFrame::Close);
    }

    /// Number of event-stream connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn prompts_received(&self) -> usize {
        self.state.prompts_received.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.bodies.lock().unwrap().last().cloned()
    }

    pub fn reject_prompts(&self, reject: bool) {
        self.state.reject_prompts.store(reject, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_queue(&self, running: &[&str], pending: &[&str]) {
        let entry = |(i, id): (usize, &&str)| json!([i, id, {}, {}, []]);
        *self.state.queue.lock().unwrap() = json!({
            "queue_running": running.iter().enumerate().map(entry).collect::<Vec<_>>(),
            "queue_pending": pending.iter().enumerate().map(entry).collect::<Vec<_>>(),
        });
    }

    pub fn set_history(&self, prompt_id: &str, status: Value) {
        let mut entry = serde_json::Map::new();
        entry.insert(
            prompt_id.to_string(),
            json!({ "status": status, "outputs": {} }),
        );
        self.state
            .history
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), Value::Object(entry));
    }

    /// Make every `/history` answer wait `delay` first.
    pub fn set_history_delay(&self, delay: Duration) {
        self.state
            .history_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit_prompt(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    state.bodies.lock().unwrap().push(body);
    if state.reject_prompts.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"type": "prompt_no_outputs"}})),
        )
            .into_response();
    }
    let number = state.prompts_received.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"prompt_id": format!("prompt-{number}"), "number": number})).into_response()
}

async fn queue(State(state): State<Arc<FakeState>>) -> Json<Value> {
    Json(state.queue.lock().unwrap().clone())
}

async fn history(State(state): State<Arc<FakeState>>, Path(prompt_id): Path<String>) -> Json<Value> {
    let delay = state.history_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let history = state.history.lock().unwrap().get(&prompt_id).cloned();
    Json(history.unwrap_or_else(|| json!({})))
}

async fn system_stats(State(state): State<Arc<FakeState>>) -> Response {
    if state.healthy.load(Ordering::SeqCst) {
        Json(json!({"system": {"os": "posix"}, "devices": []})).into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn event_stream(ws: WebSocketUpgrade, State(state): State<Arc<FakeState>>) -> Response {
    // Subscribe before the upgrade so frames sent right after the
    // connection count changes are not lost.
    let rx = state.frames.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_stream(socket, rx))
}

async fn serve_stream(mut socket: WebSocket, mut rx: broadcast::Receiver<FakeFrame>) {
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Ok(FakeFrame::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(FakeFrame::Close) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Dispatcher settings with short timings for tests.
pub fn test_config(base_url: Url, device_count: usize) -> DispatcherConfig {
    let mut config = DispatcherConfig::new(base_url, device_count);
    config.forward_timeout = Duration::from_millis(500);
    config.probe_timeout = Duration::from_millis(500);
    config.connect_timeout = Duration::from_millis(500);
    config.poll_timeout = Duration::from_millis(500);
    config.poll_interval = Duration::from_millis(50);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        jitter: 0.0,
    };
    config
}

/// An `http://127.0.0.1:<port>` address nothing listens on.
pub fn closed_port_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}

/// Start a fake backend whose port is one above a closed port.
///
/// Returns the closed address as the base URL, so device 0 is down and
/// device 1 reaches the fake.
pub async fn backend_after_closed_port() -> (Url, FakeBackend) {
    loop {
        let backend = FakeBackend::start().await;
        let Some(port) = backend.url.port().and_then(|p| p.checked_sub(1)) else {
            continue;
        };
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            let base = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
            return (base, backend);
        }
    }
}

/// Poll `check` every 10ms until it holds or 5 seconds pass.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
