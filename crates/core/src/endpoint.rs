//! Backend address resolution.
//!
//! Each device runs its own backend on consecutive ports: device `n`
//! listens on the configured base port plus `n`.

use url::Url;

use crate::error::CoreError;
use crate::types::{DeviceIndex, MAX_DEVICES};

/// Parse and validate a backend base address.
///
/// Only `http` and `https` are accepted. A trailing slash is dropped from
/// the path so that endpoint paths can be appended directly.
pub fn parse_base_url(raw: &str) -> Result<Url, CoreError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| CoreError::Configuration(format!("Invalid base address '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::Configuration(format!(
                "Unsupported scheme '{other}' in base address; expected http or https"
            )))
        }
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Address of the backend serving `device`.
///
/// The caller validates `device` against the configured device count; this
/// only rejects indices beyond [`MAX_DEVICES`] and ports that would
/// overflow.
pub fn resolve_backend(base: &Url, device: DeviceIndex) -> Result<Url, CoreError> {
    if device >= MAX_DEVICES {
        return Err(CoreError::InvalidDevice {
            device,
            device_count: MAX_DEVICES,
        });
    }
    if device == 0 {
        return Ok(base.clone());
    }

    let base_port = base.port_or_known_default().ok_or_else(|| {
        CoreError::Configuration(format!("Base address {base} has no port"))
    })?;
    let port = u16::try_from(usize::from(base_port) + device).map_err(|_| {
        CoreError::Configuration(format!(
            "Port {base_port} + device {device} exceeds the valid port range"
        ))
    })?;

    let mut url = base.clone();
    url.set_port(Some(port))
        .map_err(|_| CoreError::Configuration(format!("Cannot set port on {base}")))?;
    Ok(url)
}

/// WebSocket event-stream address for a backend HTTP address.
///
/// `http` maps to `ws` and `https` to `wss`; the path gains a `/ws`
/// suffix and the `clientId` query parameter names the listener.
pub fn websocket_url(http: &Url, client_id: &str) -> Result<Url, CoreError> {
    let scheme = match http.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoreError::Configuration(format!(
                "Unsupported scheme '{other}' for event stream"
            )))
        }
    };

    let mut url = http.clone();
    url.set_scheme(scheme)
        .map_err(|_| CoreError::Configuration("Failed to set WebSocket scheme".to_string()))?;
    let path = format!("{}/ws", http.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut().append_pair("clientId", client_id);
    Ok(url)
}

/// Join an endpoint path onto a backend address.
pub fn endpoint(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
