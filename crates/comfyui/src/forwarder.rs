//! Best-effort workflow forwarding.
//!
//! The job record is written in `Submitted` before any network I/O, so a
//! submission stays visible to status queries even if the backend is down
//! or the caller abandons the request mid-flight. Every failure is folded
//! into the returned [`SubmissionResult`].

use std::time::Duration;

use cylindria_core::job::{JobEvent, JobState};
use cylindria_core::store::JobStore;
use serde::Serialize;

use crate::api::ComfyUIApi;
use crate::device::DeviceSlot;

/// Detail recorded when the backend acknowledged the workflow.
pub const FORWARDED_DETAIL: &str = "Forwarded to ComfyUI";

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub accepted: bool,
    pub detail: String,
}

/// Wrap a client workflow in the backend's submission envelope.
///
/// A payload that already has a `prompt` key is treated as a complete
/// envelope and only gains a `client_id` if it lacks one. Anything else is
/// sent as the prompt itself.
pub fn prompt_body(payload: &serde_json::Value, client_id: &str) -> serde_json::Value {
    match payload {
        serde_json::Value::Object(map) if map.contains_key("prompt") => {
            let mut map = map.clone();
            map.entry("client_id")
                .or_insert_with(|| serde_json::Value::String(client_id.to_string()));
            serde_json::Value::Object(map)
        }
        other => serde_json::json!({
            "prompt": other,
            "client_id": client_id,
        }),
    }
}

/// Record `job_id` on `slot` and forward its workflow to the backend.
pub async fn forward(
    store: &JobStore,
    slot: &DeviceSlot,
    api: &ComfyUIApi,
    job_id: &str,
    payload: &serde_json::Value,
    timeout: Duration,
) -> SubmissionResult {
    let device = slot.index();
    store.upsert(job_id, device, JobState::Submitted);

    let body = prompt_body(payload, slot.client_id());

    match api.submit_workflow(&body, timeout).await {
        Ok(response) => {
            let detail = match &response.prompt_id {
                Some(prompt_id) => {
                    store.bind_prompt(job_id, prompt_id);
                    format!("{FORWARDED_DETAIL} (prompt {prompt_id})")
                }
                None => FORWARDED_DETAIL.to_string(),
            };
            tracing::info!(
                device,
                job_id,
                prompt_id = response.prompt_id.as_deref().unwrap_or("-"),
                queue_number = response.number,
                "Workflow forwarded to ComfyUI",
            );
            store.apply_event(
                job_id,
                JobEvent::observed().with_detail(detail.clone()),
            );
            SubmissionResult {
                accepted: true,
                detail,
            }
        }
        Err(e) if e.is_rejection() => {
            let detail = format!("ComfyUI rejected workflow ({})", e.reason());
            tracing::warn!(device, job_id, error = %e, "Workflow rejected by ComfyUI");
            store.apply_event(
                job_id,
                JobEvent::observed()
                    .with_state(JobState::Failed)
                    .with_detail(detail.clone()),
            );
            SubmissionResult {
                accepted: false,
                detail,
            }
        }
        Err(e) => {
            let detail = format!("Stored locally; forwarding failed: {}", e.reason());
            tracing::warn!(device, job_id, error = %e, "Failed to forward workflow");
            store.apply_event(
                job_id,
                JobEvent::observed().with_detail(detail.clone()),
            );
            SubmissionResult {
                accepted: false,
                detail,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_workflow_is_wrapped() {
        let workflow = serde_json::json!({"3": {"class_type": "KSampler"}});
        let body = prompt_body(&workflow, "client-1");
        assert_eq!(body["prompt"], workflow);
        assert_eq!(body["client_id"], "client-1");
    }

    #[test]
    fn envelope_keeps_existing_client_id() {
        let envelope = serde_json::json!({"prompt": {"1": {}}, "client_id": "theirs", "extra_data": {}});
        let body = prompt_body(&envelope, "ours");
        assert_eq!(body["client_id"], "theirs");
        assert!(body.get("extra_data").is_some());
    }

    #[test]
    fn envelope_gains_missing_client_id() {
        let envelope = serde_json::json!({"prompt": {"1": {}}});
        let body = prompt_body(&envelope, "ours");
        assert_eq!(body["client_id"], "ours");
        assert_eq!(body["prompt"], serde_json::json!({"1": {}}));
    }
}
