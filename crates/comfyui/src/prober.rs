//! On-demand backend reachability checks.

use std::time::Duration;

use cylindria_core::types::DeviceIndex;
use serde::Serialize;

use crate::api::ComfyUIApi;
use crate::device::{ConnectionState, DeviceSlot, Health};

/// Result of probing one device.
///
/// `connection` is reported alongside but is an independent signal: a
/// backend can answer HTTP while its event stream is down, and vice versa.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub gpu: DeviceIndex,
    pub url: String,
    pub reachable: bool,
    pub connection: ConnectionState,
}

/// Probe the backend behind `slot` with a single bounded request.
///
/// Never fails: timeouts, refused connections and non-2xx answers all
/// yield `reachable = false`. The outcome is recorded on the slot.
pub async fn probe(slot: &DeviceSlot, api: &ComfyUIApi, timeout: Duration) -> HealthReport {
    let reachable = match api.system_stats(timeout).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(device = slot.index(), error = %e, "Health probe failed");
            false
        }
    };

    let health = if reachable {
        Health::Reachable
    } else {
        Health::Unreachable
    };
    let previous = slot.set_health(health);
    if previous != Health::Unknown && previous != health {
        tracing::info!(device = slot.index(), ?previous, ?health, "Backend health changed");
    }

    HealthReport {
        gpu: slot.index(),
        url: slot.api_url().to_string(),
        reachable,
        connection: slot.connection_state(),
    }
}
