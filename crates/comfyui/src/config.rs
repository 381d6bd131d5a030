//! Runtime settings for the dispatcher and its listeners.

use std::time::Duration;

use url::Url;

use crate::reconnect::ReconnectConfig;

/// Default bound on a workflow forwarding call.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on a health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on establishing an event-stream connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between queue polls while connected.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default interval between WebSocket pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// A stream silent for longer than this is treated as lost.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Settings fixed at startup for all devices.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// HTTP address of device 0; device `n` uses the same host with the
    /// port shifted by `n`.
    pub base_url: Url,
    /// Number of devices (1..=8).
    pub device_count: usize,
    pub forward_timeout: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    /// Bound on each queue/history request made while polling.
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
    pub idle_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Fail a device's open jobs once its listener has been disconnected
    /// for this long. `None` disables the policy.
    pub orphan_failure_after: Option<Duration>,
}

impl DispatcherConfig {
    /// Settings with default timeouts for `device_count` devices at `base_url`.
    pub fn new(base_url: Url, device_count: usize) -> Self {
        Self {
            base_url,
            device_count,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_timeout: DEFAULT_FORWARD_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            orphan_failure_after: None,
        }
    }
}
