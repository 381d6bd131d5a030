//! Queue and history polling.
//!
//! Some backends drop or garble stream events, so while a listener is
//! connected it also reconciles open jobs against `/queue` and
//! `/history/{prompt_id}`. Poll results flow through the same
//! [`JobStore::apply_event`] path as stream events and are stamped with the
//! time the poll started, so a stream event observed while the poll was in
//! flight wins over it.

use std::time::Duration;

use cylindria_core::job::{Arrival, JobEvent, JobState};
use cylindria_core::store::JobStore;
use cylindria_core::types::DeviceIndex;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Final outcome of a prompt as reported by `/history`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Completed,
    Failed(String),
}

/// Interpret a `/history/{prompt_id}` payload.
///
/// Returns `None` while the prompt has no history entry or its status is
/// not final yet.
pub fn history_outcome(prompt_id: &str, history: &serde_json::Value) -> Option<HistoryOutcome> {
    let status = history.get(prompt_id)?.get("status")?;
    let status_str = status.get("status_str").and_then(|s| s.as_str());

    if status_str == Some("error") {
        let message = status
            .get("messages")
            .and_then(|m| m.as_array())
            .and_then(|messages| {
                messages.iter().find_map(|m| {
                    (m.get(0)?.as_str()? == "execution_error")
                        .then(|| m.get(1)?.get("exception_message")?.as_str())
                        .flatten()
                })
            })
            .unwrap_or("execution failed");
        return Some(HistoryOutcome::Failed(message.to_string()));
    }

    let completed = status.get("completed").and_then(|c| c.as_bool()) == Some(true);
    if completed || status_str == Some("success") {
        return Some(HistoryOutcome::Completed);
    }
    None
}

/// Reconcile every open job on `device` once.
///
/// Returns the number of job records updated. Only a failed `/queue` call
/// is an error; per-prompt history failures are logged and skipped.
pub async fn poll_once(
    device: DeviceIndex,
    api: &ComfyUIApi,
    store: &JobStore,
    timeout: Duration,
) -> Result<usize, ComfyUIApiError> {
    let open = store.open_jobs(device);
    if open.is_empty() {
        return Ok(0);
    }

    let started = Arrival::now();
    let queue = api.get_queue(timeout).await?;

    let mut events = Vec::with_capacity(open.len());
    let mut finished = Vec::new();
    for (job_id, prompt_id) in open {
        let raw = serde_json::json!({ "source": "queue", "prompt_id": prompt_id });
        if queue.running.contains(&prompt_id) {
            events.push((job_id, JobEvent::observed().with_raw(raw).with_state(JobState::Running)));
        } else if queue.pending.contains(&prompt_id) {
            events.push((job_id, JobEvent::observed().with_raw(raw).with_state(JobState::Queued)));
        } else {
            finished.push((job_id, prompt_id));
        }
    }

    // Prompts no longer queued are looked up concurrently, each under its
    // own timeout.
    let lookups = finished.into_iter().map(|(job_id, prompt_id)| async move {
        let history = api.get_history(&prompt_id, timeout).await;
        (job_id, prompt_id, history)
    });
    for (job_id, prompt_id, history) in futures::future::join_all(lookups).await {
        let history = match history {
            Ok(history) => history,
            Err(e) => {
                tracing::debug!(device, prompt_id = %prompt_id, error = %e, "History poll failed");
                continue;
            }
        };
        let event = match history_outcome(&prompt_id, &history) {
            Some(HistoryOutcome::Completed) => JobEvent::observed()
                .with_raw(history)
                .with_state(JobState::Completed)
                .with_progress(100)
                .with_detail("completed"),
            Some(HistoryOutcome::Failed(message)) => JobEvent::observed()
                .with_raw(history)
                .with_state(JobState::Failed)
                .with_detail(message),
            None => continue,
        };
        events.push((job_id, event));
    }

    let mut updated = 0;
    for (job_id, event) in events {
        if store.apply_event(&job_id, event.at(started)) {
            updated += 1;
        }
    }

    Ok(updated)
}
