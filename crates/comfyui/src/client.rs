//! WebSocket client for a ComfyUI event stream.
//!
//! [`ComfyUIClient`] holds the event-stream address of one backend. Call
//! [`ComfyUIClient::connect`] to open a live [`WsStream`].

use std::time::Duration;

use cylindria_core::types::DeviceIndex;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// A live WebSocket connection to a ComfyUI instance.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection handle for one backend's event stream.
pub struct ComfyUIClient {
    device: DeviceIndex,
    ws_url: Url,
    connect_timeout: Duration,
}

impl ComfyUIClient {
    /// * `device`          - device index, used for logging.
    /// * `ws_url`          - full stream address including `clientId`.
    /// * `connect_timeout` - bound on the TCP + WebSocket handshake.
    pub fn new(device: DeviceIndex, ws_url: Url, connect_timeout: Duration) -> Self {
        Self {
            device,
            ws_url,
            connect_timeout,
        }
    }

    /// Open the event stream, failing if the handshake does not complete
    /// within the connect timeout.
    pub async fn connect(&self) -> Result<WsStream, ComfyUIClientError> {
        let handshake = connect_async(self.ws_url.as_str());

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| ComfyUIClientError::Timeout(self.connect_timeout))?
            .map_err(|e| {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(
            device = self.device,
            url = %self.ws_url,
            "Connected to ComfyUI event stream",
        );

        Ok(ws_stream)
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not finish in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}
