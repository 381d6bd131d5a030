//! Per-device bookkeeping.
//!
//! One [`DeviceSlot`] exists per configured GPU for the whole process
//! lifetime. It holds the resolved backend addresses, the client id the
//! backend routes our events by, and two observable signals: the event
//! listener's connection state and the health last seen by the prober.

use cylindria_core::endpoint::{resolve_backend, websocket_url};
use cylindria_core::error::CoreError;
use cylindria_core::types::DeviceIndex;
use serde::Serialize;
use tokio::sync::watch;
use url::Url;

/// Event-stream connection state of a device's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Reachability of a backend as last observed by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Unknown,
    Reachable,
    Unreachable,
}

pub struct DeviceSlot {
    index: DeviceIndex,
    api_url: Url,
    ws_url: Url,
    client_id: String,
    connection: watch::Sender<ConnectionState>,
    health: watch::Sender<Health>,
}

impl DeviceSlot {
    /// Resolve the addresses for `index` relative to `base_url`.
    pub fn new(index: DeviceIndex, base_url: &Url) -> Result<Self, CoreError> {
        let api_url = resolve_backend(base_url, index)?;
        let client_id = uuid::Uuid::new_v4().to_string();
        let ws_url = websocket_url(&api_url, &client_id)?;

        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (health, _) = watch::channel(Health::Unknown);

        Ok(Self {
            index,
            api_url,
            ws_url,
            client_id,
            connection,
            health,
        })
    }

    pub fn index(&self) -> DeviceIndex {
        self.index
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    /// Client id used on the event stream and in every submission.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let changed = self.connection.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!(device = self.index, ?state, "Connection state changed");
        }
    }

    /// Record the latest probe outcome, returning the previous one.
    pub fn set_health(&self, health: Health) -> Health {
        self.health.send_replace(health)
    }
}

#[cfg(test)]
mod tests {
    use cylindria_core::endpoint::parse_base_url;

    use super::*;

    #[test]
    fn slot_resolves_addresses() {
        let base = parse_base_url("http://127.0.0.1:8188").unwrap();
        let slot = DeviceSlot::new(2, &base).unwrap();

        assert_eq!(slot.api_url().port(), Some(8190));
        assert_eq!(slot.ws_url().scheme(), "ws");
        assert_eq!(slot.ws_url().port(), Some(8190));
        assert!(slot.ws_url().as_str().ends_with(slot.client_id()));
    }

    #[test]
    fn slot_starts_disconnected_and_unknown() {
        let base = parse_base_url("http://127.0.0.1:8188").unwrap();
        let slot = DeviceSlot::new(0, &base).unwrap();
        assert_eq!(slot.connection_state(), ConnectionState::Disconnected);
        assert_eq!(slot.set_health(Health::Reachable), Health::Unknown);
        assert_eq!(slot.set_health(Health::Unreachable), Health::Reachable);
    }

    #[test]
    fn connection_state_follows_last_set() {
        let base = parse_base_url("http://127.0.0.1:8188").unwrap();
        let slot = DeviceSlot::new(0, &base).unwrap();

        slot.set_connection_state(ConnectionState::Connecting);
        slot.set_connection_state(ConnectionState::Connecting);
        assert_eq!(slot.connection_state(), ConnectionState::Connecting);

        slot.set_connection_state(ConnectionState::Connected);
        assert_eq!(slot.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn each_slot_gets_its_own_client_id() {
        let base = parse_base_url("http://127.0.0.1:8188").unwrap();
        let a = DeviceSlot::new(0, &base).unwrap();
        let b = DeviceSlot::new(1, &base).unwrap();
        assert_ne!(a.client_id(), b.client_id());
    }
}
