//! Per-device event listener.
//!
//! Each device gets one long-lived task running [`EventListener::run`]:
//! connect, process the event stream until it drops, back off, reconnect.
//! The loop only exits when its cancellation token fires. Connection
//! failures are never surfaced to callers; they show up as the slot's
//! [`ConnectionState`] and in the logs.

use std::sync::Arc;
use std::time::Duration;

use cylindria_core::store::JobStore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::ComfyUIClient;
use crate::config::DispatcherConfig;
use crate::device::{ConnectionState, DeviceSlot};
use crate::processor::{run_session, SessionContext, SessionEnd};
use crate::reconnect::{jittered, next_delay, wait, ReconnectConfig};

/// Detail recorded on jobs failed by the orphan policy.
pub const CONNECTION_LOST_DETAIL: &str = "connection to backend lost";

/// Listener timing, taken from [`DispatcherConfig`].
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub reconnect: ReconnectConfig,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub keepalive_interval: Duration,
    pub idle_timeout: Duration,
    pub orphan_failure_after: Option<Duration>,
}

impl From<&DispatcherConfig> for ListenerSettings {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
            keepalive_interval: config.keepalive_interval,
            idle_timeout: config.idle_timeout,
            orphan_failure_after: config.orphan_failure_after,
        }
    }
}

pub struct EventListener {
    slot: Arc<DeviceSlot>,
    client: ComfyUIClient,
    api: Arc<ComfyUIApi>,
    store: Arc<JobStore>,
    settings: ListenerSettings,
}

impl EventListener {
    pub fn new(
        slot: Arc<DeviceSlot>,
        client: ComfyUIClient,
        api: Arc<ComfyUIApi>,
        store: Arc<JobStore>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            slot,
            client,
            api,
            store,
            settings,
        }
    }

    /// Connect -> process -> reconnect until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let device = self.slot.index();
        let ctx = SessionContext {
            device,
            store: &self.store,
            api: &self.api,
            poll_interval: self.settings.poll_interval,
            poll_timeout: self.settings.poll_timeout,
            keepalive_interval: self.settings.keepalive_interval,
            idle_timeout: self.settings.idle_timeout,
        };

        let mut delay = self.settings.reconnect.initial_delay;
        let mut attempt = 0u32;
        let mut outage = Outage::new();

        loop {
            attempt += 1;
            self.slot.set_connection_state(ConnectionState::Connecting);

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.client.connect() => result,
            };

            match result {
                Ok(ws_stream) => {
                    self.slot.set_connection_state(ConnectionState::Connected);
                    if attempt > 1 {
                        tracing::info!(device, attempt, "Reconnected to ComfyUI");
                    }
                    delay = self.settings.reconnect.initial_delay;
                    attempt = 0;

                    let end = run_session(ws_stream, &ctx, &cancel).await;
                    self.slot.set_connection_state(ConnectionState::Disconnected);
                    outage = Outage::new();
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed => {
                            tracing::warn!(device, "ComfyUI event stream closed, reconnecting");
                        }
                        SessionEnd::Lost(reason) => {
                            tracing::warn!(device, reason = %reason, "ComfyUI connection lost, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    self.slot.set_connection_state(ConnectionState::Disconnected);
                    tracing::warn!(
                        device,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Connection to ComfyUI failed, backing off",
                    );
                }
            }

            self.check_orphans(&mut outage);

            if !wait(jittered(delay, &self.settings.reconnect), &cancel).await {
                break;
            }
            delay = next_delay(delay, &self.settings.reconnect);
        }

        self.slot.set_connection_state(ConnectionState::Disconnected);
        tracing::info!(device, "Event listener stopped");
    }

    // ---- private helpers ----

    fn check_orphans(&self, outage: &mut Outage) {
        let Some(limit) = self.settings.orphan_failure_after else {
            return;
        };
        if outage.jobs_failed || outage.since.elapsed() < limit {
            return;
        }
        outage.jobs_failed = true;

        let device = self.slot.index();
        let failed = self.store.fail_open_jobs(device, CONNECTION_LOST_DETAIL);
        if failed > 0 {
            tracing::warn!(
                device,
                failed,
                disconnected_secs = outage.since.elapsed().as_secs(),
                "Failed open jobs after prolonged disconnection",
            );
        }
    }
}

/// Tracks one continuous disconnection.
struct Outage {
    since: Instant,
    jobs_failed: bool,
}

impl Outage {
    fn new() -> Self {
        Self {
            since: Instant::now(),
            jobs_failed: false,
        }
    }
}
