//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, queue and history retrieval, and the
//! lightweight `system_stats` endpoint using [`reqwest`]. Every call takes
//! its own timeout so that no request can block indefinitely.

use std::collections::HashSet;
use std::time::Duration;

use cylindria_core::endpoint::endpoint;
use serde::Deserialize;
use url::Url;

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: Url,
}

/// Response returned by the ComfyUI `/prompt` endpoint after queuing a
/// workflow. Both fields are optional so that unexpected acknowledgments
/// still count as accepted.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Raw `/queue` payload. Each entry is an array whose second element is
/// the prompt id.
#[derive(Debug, Default, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    queue_pending: Vec<serde_json::Value>,
}

/// Prompt ids currently executing or waiting on one backend.
#[derive(Debug, Default, Clone)]
pub struct QueueSnapshot {
    pub running: HashSet<String>,
    pub pending: HashSet<String>,
}

impl QueueSnapshot {
    fn from_response(raw: QueueResponse) -> Self {
        fn prompt_ids(entries: &[serde_json::Value]) -> HashSet<String> {
            entries
                .iter()
                .filter_map(|entry| entry.get(1).and_then(|id| id.as_str()))
                .map(str::to_string)
                .collect()
        }
        Self {
            running: prompt_ids(&raw.queue_running),
            pending: prompt_ids(&raw.queue_pending),
        }
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApiError {
    /// Whether the backend answered and refused the request itself
    /// (a 4xx status), as opposed to being unreachable or failing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ComfyUIApiError::ApiError { status, .. } if (400..500).contains(status))
    }

    /// Short reason suitable for a user-facing detail string.
    pub fn reason(&self) -> String {
        match self {
            ComfyUIApiError::Request(e) if e.is_timeout() => "request timed out".to_string(),
            ComfyUIApiError::Request(e) if e.is_connect() => "connection refused".to_string(),
            ComfyUIApiError::Request(e) if e.is_decode() => "unreadable response".to_string(),
            ComfyUIApiError::Request(_) => "request failed".to_string(),
            ComfyUIApiError::ApiError { status, .. } => format!("HTTP {status}"),
        }
    }
}

impl ComfyUIApi {
    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling across devices).
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn with_client(client: reqwest::Client, api_url: Url) -> Self {
        Self { client, api_url }
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with `body` as-is; callers build the
    /// `{"prompt": ..., "client_id": ...}` envelope.
    pub async fn submit_workflow(
        &self,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let response = self
            .client
            .post(endpoint(&self.api_url, "prompt"))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        // An empty or non-JSON acknowledgment still means the workflow
        // was queued.
        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    /// Fetch the running and pending prompt ids (`GET /queue`).
    pub async fn get_queue(&self, timeout: Duration) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(endpoint(&self.api_url, "queue"))
            .timeout(timeout)
            .send()
            .await?;

        let raw: QueueResponse = Self::parse_response(response).await?;
        Ok(QueueSnapshot::from_response(raw))
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends `GET /history/{prompt_id}`. The JSON is keyed by prompt id
    /// and is empty while the prompt has not finished.
    pub async fn get_history(
        &self,
        prompt_id: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(endpoint(&self.api_url, &format!("history/{prompt_id}")))
            .timeout(timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Hit the lightweight `GET /system_stats` endpoint, discarding the body.
    pub async fn system_stats(&self, timeout: Duration) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(endpoint(&self.api_url, "system_stats"))
            .timeout(timeout)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
