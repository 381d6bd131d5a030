//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages with the shape `{"type": "<kind>", "data":
//! {...}}`. Unknown fields and missing optional fields are tolerated, and
//! unknown message types decode to [`BackendMessage::Other`]. Only payloads
//! that are not a typed JSON object, or whose `data` does not fit the known
//! shape for its type, are reported as [`MessageError`].

use cylindria_core::job::{step_percent, JobEvent, JobState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// A decoded event-stream message.
///
/// Progress messages from older backends carry no prompt id; the
/// processor fills it in from the prompt currently executing.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Server status broadcast (queue depth).
    Status { queue_remaining: Option<i64> },

    /// A prompt has started executing.
    ExecutionStart { prompt_id: Option<String> },

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached {
        prompt_id: Option<String>,
        nodes: Vec<String>,
    },

    /// A node is executing, or the prompt finished when `node` is `None`.
    Executing {
        prompt_id: Option<String>,
        node: Option<String>,
    },

    /// Step-level progress within a node.
    Progress {
        prompt_id: Option<String>,
        node: Option<String>,
        value: f64,
        max: f64,
    },

    /// A node has finished and produced output.
    Executed {
        prompt_id: Option<String>,
        node: Option<String>,
    },

    /// The whole prompt finished successfully.
    ExecutionSuccess { prompt_id: Option<String> },

    /// Execution failed with an error.
    ExecutionError {
        prompt_id: Option<String>,
        node_id: Option<String>,
        exception_type: Option<String>,
        exception_message: Option<String>,
    },

    /// Execution was interrupted on the backend.
    ExecutionInterrupted { prompt_id: Option<String> },

    /// Any other message type; ignored.
    Other { kind: String },
}

/// A message together with the raw payload it was decoded from.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub message: BackendMessage,
    pub raw: serde_json::Value,
}

/// Why a payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no message type")]
    MissingType,

    #[error("invalid data for '{kind}': {source}")]
    InvalidData {
        kind: String,
        source: serde_json::Error,
    },
}

// ---- data payloads ----

#[derive(Debug, Default, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: Option<QueueStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct QueueStatus {
    #[serde(default)]
    exec_info: Option<ExecInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecInfo {
    #[serde(default)]
    queue_remaining: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachedData {
    #[serde(default)]
    nodes: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeData {
    #[serde(default)]
    node: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProgressData {
    #[serde(deserialize_with = "lenient_number")]
    value: f64,
    #[serde(deserialize_with = "lenient_number")]
    max: f64,
    #[serde(default)]
    node: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorData {
    #[serde(default)]
    node_id: Option<serde_json::Value>,
    #[serde(default)]
    exception_type: Option<String>,
    #[serde(default)]
    exception_message: Option<String>,
}

/// Some custom nodes report step counts as strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{text}'"))),
    }
}

/// Parse a ComfyUI event-stream text payload.
pub fn parse_message(text: &str) -> Result<Decoded, MessageError> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let object = raw.as_object().ok_or(MessageError::NotAnObject)?;

    let kind = object
        .get("type")
        .or_else(|| object.get("event"))
        .and_then(|v| v.as_str())
        .ok_or(MessageError::MissingType)?
        .to_string();
    let data = object.get("data").cloned().unwrap_or(serde_json::Value::Null);
    let prompt_id = extract_prompt_id(&raw);

    let message = match kind.as_str() {
        "status" => {
            let data: StatusData = decode_data(&kind, &data)?;
            BackendMessage::Status {
                queue_remaining: data
                    .status
                    .and_then(|s| s.exec_info)
                    .and_then(|e| e.queue_remaining),
            }
        }
        "execution_start" => BackendMessage::ExecutionStart { prompt_id },
        "execution_cached" => {
            let data: CachedData = decode_data(&kind, &data)?;
            BackendMessage::ExecutionCached {
                prompt_id,
                nodes: data.nodes.iter().filter_map(node_label).collect(),
            }
        }
        "executing" => {
            let data: NodeData = decode_data(&kind, &data)?;
            BackendMessage::Executing {
                prompt_id,
                node: data.node.as_ref().and_then(node_label),
            }
        }
        "progress" => {
            let data: ProgressData = decode_required(&kind, &data)?;
            BackendMessage::Progress {
                prompt_id,
                node: data.node.as_ref().and_then(node_label),
                value: data.value,
                max: data.max,
            }
        }
        "executed" => {
            let data: NodeData = decode_data(&kind, &data)?;
            BackendMessage::Executed {
                prompt_id,
                node: data.node.as_ref().and_then(node_label),
            }
        }
        "execution_success" => BackendMessage::ExecutionSuccess { prompt_id },
        "execution_error" => {
            let data: ErrorData = decode_data(&kind, &data)?;
            BackendMessage::ExecutionError {
                prompt_id,
                node_id: data.node_id.as_ref().and_then(node_label),
                exception_type: data.exception_type,
                exception_message: data.exception_message,
            }
        }
        "execution_interrupted" => BackendMessage::ExecutionInterrupted { prompt_id },
        _ => BackendMessage::Other { kind },
    };

    Ok(Decoded { message, raw })
}

/// Prompt id from the top level, else `data.prompt_id`, else `data.id`.
fn extract_prompt_id(raw: &serde_json::Value) -> Option<String> {
    raw.get("prompt_id")
        .and_then(|v| v.as_str())
        .or_else(|| {
            let data = raw.get("data")?;
            data.get("prompt_id")
                .and_then(|v| v.as_str())
                .or_else(|| data.get("id").and_then(|v| v.as_str()))
        })
        .map(str::to_string)
}

/// Node ids are strings in current backends and integers in older ones.
fn node_label(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode `data`, treating a missing payload as all-defaults.
fn decode_data<T: DeserializeOwned + Default>(
    kind: &str,
    data: &serde_json::Value,
) -> Result<T, MessageError> {
    if data.is_null() {
        return Ok(T::default());
    }
    decode_required(kind, data)
}

fn decode_required<T: DeserializeOwned>(
    kind: &str,
    data: &serde_json::Value,
) -> Result<T, MessageError> {
    T::deserialize(data).map_err(|source| MessageError::InvalidData {
        kind: kind.to_string(),
        source,
    })
}

impl BackendMessage {
    /// Prompt id carried by the message, if any.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            BackendMessage::ExecutionStart { prompt_id }
            | BackendMessage::ExecutionCached { prompt_id, .. }
            | BackendMessage::Executing { prompt_id, .. }
            | BackendMessage::Progress { prompt_id, .. }
            | BackendMessage::Executed { prompt_id, .. }
            | BackendMessage::ExecutionSuccess { prompt_id }
            | BackendMessage::ExecutionError { prompt_id, .. }
            | BackendMessage::ExecutionInterrupted { prompt_id } => prompt_id.as_deref(),
            BackendMessage::Status { .. } | BackendMessage::Other { .. } => None,
        }
    }

    /// Translate the message into a job update.
    ///
    /// Returns `None` for messages that do not describe a job.
    pub fn job_event(&self, raw: serde_json::Value) -> Option<JobEvent> {
        let event = JobEvent::observed().with_raw(raw);
        let event = match self {
            BackendMessage::ExecutionStart { .. } => event
                .with_state(JobState::Running)
                .with_detail("execution_start"),
            BackendMessage::ExecutionCached { .. } => event
                .with_state(JobState::Running)
                .with_detail("execution_cached"),
            BackendMessage::Executing {
                node: Some(node), ..
            } => event
                .with_state(JobState::Running)
                .with_detail(format!("executing node {node}")),
            BackendMessage::Executing { node: None, .. } => event
                .with_state(JobState::Completed)
                .with_progress(100)
                .with_detail("execution complete"),
            BackendMessage::Progress { value, max, .. } => match step_percent(*value, *max) {
                Some(percent) => event
                    .with_state(JobState::Running)
                    .with_progress(percent)
                    .with_detail(format!("progress ({percent}%)")),
                None => event.with_state(JobState::Running).with_detail("progress"),
            },
            BackendMessage::Executed { node, .. } => {
                let detail = match node {
                    Some(node) => format!("executed node {node}"),
                    None => "executed".to_string(),
                };
                event.with_state(JobState::Running).with_detail(detail)
            }
            BackendMessage::ExecutionSuccess { .. } => event
                .with_state(JobState::Completed)
                .with_progress(100)
                .with_detail("execution_success"),
            BackendMessage::ExecutionError {
                exception_message,
                exception_type,
                ..
            } => {
                let detail = match (exception_type, exception_message) {
                    (Some(t), Some(m)) => format!("{t}: {m}"),
                    (None, Some(m)) => m.clone(),
                    (Some(t), None) => t.clone(),
                    (None, None) => "execution_error".to_string(),
                };
                event.with_state(JobState::Failed).with_detail(detail)
            }
            BackendMessage::ExecutionInterrupted { .. } => event
                .with_state(JobState::Failed)
                .with_detail("execution_interrupted"),
            BackendMessage::Status { .. } | BackendMessage::Other { .. } => return None,
        };
        Some(event)
    }
}
