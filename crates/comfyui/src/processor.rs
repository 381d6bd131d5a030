//! Event-stream session loop.
//!
//! Drives one connected WebSocket session: reads frames, decodes them with
//! [`parse_message`], resolves the backend prompt id to a job and applies
//! the resulting event to the [`JobStore`]. The same `select!` loop sends
//! keepalive pings and runs periodic queue polls until the stream closes,
//! goes silent, or the listener is cancelled.

use std::time::Duration;

use cylindria_core::store::JobStore;
use cylindria_core::types::DeviceIndex;
use futures::future::{BoxFuture, OptionFuture};
use futures::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::WsStream;
use crate::messages::{parse_message, BackendMessage};
use crate::poller::poll_once;

/// Bound on sending the close frame during shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a session needs besides the stream itself.
pub struct SessionContext<'a> {
    pub device: DeviceIndex,
    pub store: &'a JobStore,
    pub api: &'a ComfyUIApi,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub keepalive_interval: Duration,
    pub idle_timeout: Duration,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The backend closed the stream.
    Closed,
    /// Receive error, failed ping or idle timeout.
    Lost(String),
    /// The listener was shut down.
    Cancelled,
}

/// Per-session decoding state.
///
/// Older backends omit the prompt id from progress messages, so the
/// prompt announced by the last `execution_start`/`executing` is used as a
/// fallback.
#[derive(Debug, Default)]
pub struct StreamTracker {
    current_prompt: Option<String>,
}

impl StreamTracker {
    /// Decode one text payload and apply it to the store.
    ///
    /// Returns whether a job record was updated. Malformed payloads and
    /// events for unknown prompts are logged and dropped.
    pub fn handle_text(&mut self, device: DeviceIndex, store: &JobStore, text: &str) -> bool {
        let decoded = match parse_message(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    device,
                    error = %e,
                    raw_message = %text,
                    "Dropping malformed ComfyUI message",
                );
                return false;
            }
        };

        let message = &decoded.message;
        match message {
            BackendMessage::Status { queue_remaining } => {
                tracing::debug!(device, queue_remaining, "ComfyUI queue status");
                return false;
            }
            BackendMessage::Other { kind } => {
                tracing::trace!(device, kind = %kind, "Ignoring ComfyUI message");
                return false;
            }
            _ => {}
        }

        let prompt_id = match message.prompt_id() {
            Some(id) => id.to_string(),
            None => match &self.current_prompt {
                Some(id) => id.clone(),
                None => {
                    tracing::debug!(device, "Dropping event without prompt id");
                    return false;
                }
            },
        };
        self.track(message, &prompt_id);

        let Some(job_id) = store.resolve(&prompt_id) else {
            tracing::debug!(device, prompt_id = %prompt_id, "Dropping event for unknown prompt");
            return false;
        };
        let Some(event) = message.job_event(decoded.raw.clone()) else {
            return false;
        };

        tracing::debug!(
            device,
            job_id = %job_id,
            prompt_id = %prompt_id,
            state = ?event.state,
            progress = ?event.progress,
            "Applying ComfyUI event",
        );
        store.apply_event(&job_id, event)
    }

    fn track(&mut self, message: &BackendMessage, prompt_id: &str) {
        match message {
            BackendMessage::ExecutionStart { .. }
            | BackendMessage::Executing { node: Some(_), .. } => {
                self.current_prompt = Some(prompt_id.to_string());
            }
            BackendMessage::Executing { node: None, .. }
            | BackendMessage::ExecutionSuccess { .. }
            | BackendMessage::ExecutionError { .. }
            | BackendMessage::ExecutionInterrupted { .. } => {
                if self.current_prompt.as_deref() == Some(prompt_id) {
                    self.current_prompt = None;
                }
            }
            _ => {}
        }
    }
}

/// Process frames from a connected stream until it ends.
pub async fn run_session(
    ws_stream: WsStream,
    ctx: &SessionContext<'_>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let device = ctx.device;
    let (mut sink, mut stream) = ws_stream.split();
    let mut tracker = StreamTracker::default();

    // Poll right away to pick up anything missed while disconnected.
    let mut poll_ticker = tokio::time::interval(ctx.poll_interval);
    poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + ctx.keepalive_interval,
        ctx.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_frame = Instant::now();
    // At most one poll in flight, driven alongside the stream.
    let mut poll: Option<BoxFuture<'_, Result<usize, ComfyUIApiError>>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                return SessionEnd::Cancelled;
            }
            _ = poll_ticker.tick(), if poll.is_none() => {
                poll = Some(Box::pin(poll_once(device, ctx.api, ctx.store, ctx.poll_timeout)));
            }
            Some(outcome) = OptionFuture::from(poll.as_mut()) => {
                poll = None;
                match outcome {
                    Ok(0) => {}
                    Ok(updated) => tracing::debug!(device, updated, "Queue poll updated jobs"),
                    Err(e) => tracing::debug!(device, error = %e, "Queue poll failed"),
                }
            }
            _ = keepalive.tick() => {
                if last_frame.elapsed() > ctx.idle_timeout {
                    return SessionEnd::Lost(format!(
                        "no frames for {}s",
                        last_frame.elapsed().as_secs()
                    ));
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    return SessionEnd::Lost(format!("ping failed: {e}"));
                }
            }
            msg = stream.next() => {
                last_frame = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracker.handle_text(device, ctx.store, &text);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // Preview images are binary; JSON sent as binary is
                        // decoded like text.
                        match std::str::from_utf8(&bytes) {
                            Ok(text) if text.trim_start().starts_with('{') => {
                                tracker.handle_text(device, ctx.store, text);
                            }
                            _ => tracing::trace!(device, len = bytes.len(), "Ignoring binary frame"),
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(device, ?frame, "ComfyUI closed the event stream");
                        return SessionEnd::Closed;
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Lost(format!("receive error: {e}"));
                    }
                    None => return SessionEnd::Closed,
                }
            }
        }
    }
}
