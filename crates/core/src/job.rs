//! Job records and the lifecycle rules applied to backend events.
//!
//! A [`JobRecord`] is created once per submitted job and then mutated in
//! place by [`JobEvent`]s decoded from a backend's event stream or from
//! queue polling. Terminal states are sticky: once a job reaches
//! [`JobState::Completed`] or [`JobState::Failed`], later events still
//! refresh progress and detail but never move the state.

use std::time::Instant;

use serde::Serialize;

use crate::types::{DeviceIndex, Timestamp};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Submitted,
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Whether no further state transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    /// Device the job was submitted to.
    pub gpu: DeviceIndex,
    pub state: JobState,
    pub submitted_at: Timestamp,
    /// Wall-clock arrival of the last applied update. Display only; updates
    /// are ordered by monotonic arrival.
    pub updated_at: Timestamp,
    /// Completion percentage (0-100) as last reported by the backend.
    pub progress: u8,
    pub detail: Option<String>,
    /// Backend-assigned prompt id, once the backend acknowledged the job.
    pub prompt_id: Option<String>,
    /// Last backend payload applied to this record, kept for diagnostics.
    pub raw: serde_json::Value,
    #[serde(skip)]
    last_arrival: Instant,
}

impl JobRecord {
    pub fn new(job_id: &str, gpu: DeviceIndex, state: JobState) -> Self {
        let now = Arrival::now();
        Self {
            job_id: job_id.to_string(),
            gpu,
            state,
            submitted_at: now.wall,
            updated_at: now.wall,
            progress: 0,
            detail: None,
            prompt_id: None,
            raw: serde_json::Value::Null,
            last_arrival: now.instant,
        }
    }

    /// Apply an event in place.
    ///
    /// Returns `false` without touching the record when the event arrived
    /// before the record's last update (later arrival wins). Events without
    /// a backend payload leave `raw` as it is.
    pub fn apply(&mut self, event: JobEvent) -> bool {
        if event.arrival.instant < self.last_arrival {
            return false;
        }

        if let Some(state) = event.state {
            if !self.state.is_terminal() {
                self.state = state;
            }
        }
        if let Some(progress) = event.progress {
            self.progress = progress;
        }
        if let Some(detail) = event.detail {
            self.detail = Some(detail);
        }
        if let Some(raw) = event.raw {
            self.raw = raw;
        }
        self.last_arrival = event.arrival.instant;
        self.updated_at = event.arrival.wall;
        true
    }
}

/// When an update reached the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    /// Monotonic; the only clock used for ordering.
    pub instant: Instant,
    pub wall: Timestamp,
}

impl Arrival {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: chrono::Utc::now(),
        }
    }
}

/// A decoded status update for one job.
///
/// Backends report state, progress and detail independently, so each is
/// optional. `raw` is `None` for updates the dispatcher makes itself.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub state: Option<JobState>,
    pub progress: Option<u8>,
    pub detail: Option<String>,
    pub raw: Option<serde_json::Value>,
    pub arrival: Arrival,
}

impl JobEvent {
    /// An empty event arriving now.
    pub fn observed() -> Self {
        Self {
            state: None,
            progress: None,
            detail: None,
            raw: None,
            arrival: Arrival::now(),
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Order this event as if it arrived at `arrival`.
    pub fn at(mut self, arrival: Arrival) -> Self {
        self.arrival = arrival;
        self
    }
}

/// Convert a `value / max` step count into a whole percentage.
///
/// Returns `None` for non-finite inputs or a non-positive `max`. The
/// current step is clamped into `0..=max` first.
pub fn step_percent(value: f64, max: f64) -> Option<u8> {
    if !value.is_finite() || !max.is_finite() || max <= 0.0 {
        return None;
    }
    let percent = value.clamp(0.0, max) / max * 100.0;
    Some(percent.round().clamp(0.0, 100.0) as u8)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record() -> JobRecord {
        JobRecord::new("job-1", 0, JobState::Submitted)
    }

    #[test]
    fn new_record_starts_empty() {
        let r = record();
        assert_eq!(r.state, JobState::Submitted);
        assert_eq!(r.progress, 0);
        assert_eq!(r.submitted_at, r.updated_at);
        assert!(r.prompt_id.is_none());
        assert!(r.raw.is_null());
    }

    #[test]
    fn apply_overwrites_reported_fields() {
        let mut r = record();
        let event = JobEvent::observed()
            .with_raw(serde_json::json!({"type": "progress"}))
            .with_state(JobState::Running)
            .with_progress(40)
            .with_detail("progress (40%)");
        let at = event.arrival.wall;

        assert!(r.apply(event));
        assert_eq!(r.state, JobState::Running);
        assert_eq!(r.progress, 40);
        assert_eq!(r.detail.as_deref(), Some("progress (40%)"));
        assert_eq!(r.raw["type"], "progress");
        assert_eq!(r.updated_at, at);
    }

    #[test]
    fn apply_keeps_unreported_fields() {
        let mut r = record();
        r.apply(JobEvent::observed().with_progress(70).with_detail("x"));
        r.apply(JobEvent::observed().with_state(JobState::Running));

        assert_eq!(r.progress, 70);
        assert_eq!(r.detail.as_deref(), Some("x"));
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut r = record();
        r.apply(JobEvent::observed().with_state(JobState::Completed));

        let applied = r.apply(
            JobEvent::observed()
                .with_state(JobState::Running)
                .with_progress(55)
                .with_detail("late progress"),
        );

        assert!(applied);
        assert_eq!(r.state, JobState::Completed);
        assert_eq!(r.progress, 55);
        assert_eq!(r.detail.as_deref(), Some("late progress"));
    }

    #[test]
    fn failed_is_sticky_too() {
        let mut r = record();
        r.apply(JobEvent::observed().with_state(JobState::Failed));
        r.apply(JobEvent::observed().with_state(JobState::Completed));
        assert_eq!(r.state, JobState::Failed);
    }

    #[test]
    fn non_terminal_states_follow_last_write() {
        let mut r = record();
        r.apply(JobEvent::observed().with_state(JobState::Running));
        r.apply(JobEvent::observed().with_state(JobState::Queued));
        assert_eq!(r.state, JobState::Queued);
    }

    #[test]
    fn progress_regression_is_accepted() {
        let mut r = record();
        r.apply(JobEvent::observed().with_progress(80));
        r.apply(JobEvent::observed().with_progress(10));
        assert_eq!(r.progress, 10);
    }

    #[test]
    fn stale_event_is_ignored() {
        let earlier = Arrival::now();
        std::thread::sleep(Duration::from_millis(2));
        let mut r = record();

        let applied = r.apply(JobEvent::observed().with_state(JobState::Running).at(earlier));

        assert!(!applied);
        assert_eq!(r.state, JobState::Submitted);
    }

    #[test]
    fn later_arrival_wins() {
        let mut r = record();
        let first = Arrival::now();
        std::thread::sleep(Duration::from_millis(2));
        let second = Arrival::now();

        r.apply(JobEvent::observed().with_progress(20).at(first));
        r.apply(JobEvent::observed().with_progress(30).at(second));
        assert_eq!(r.updated_at, second.wall);
        assert_eq!(r.progress, 30);

        // Arriving late with an older stamp changes nothing.
        assert!(!r.apply(JobEvent::observed().with_progress(25).at(first)));
        assert_eq!(r.updated_at, second.wall);
        assert_eq!(r.progress, 30);
    }

    #[test]
    fn wall_clock_step_back_does_not_drop_events() {
        let mut r = record();
        let ahead = Arrival {
            instant: Instant::now(),
            wall: chrono::Utc::now() + chrono::Duration::seconds(60),
        };
        r.apply(JobEvent::observed().with_state(JobState::Running).at(ahead));

        // The wall clock is now behind the last update, but this event still
        // arrived later.
        let applied = r.apply(
            JobEvent::observed()
                .with_raw(serde_json::json!({"type": "execution_success"}))
                .with_state(JobState::Completed),
        );

        assert!(applied);
        assert_eq!(r.state, JobState::Completed);
        assert_eq!(r.raw["type"], "execution_success");
    }

    #[test]
    fn event_without_payload_keeps_last_raw() {
        let mut r = record();
        r.apply(
            JobEvent::observed()
                .with_raw(serde_json::json!({"type": "execution_start"}))
                .with_state(JobState::Running),
        );
        r.apply(JobEvent::observed().with_detail("Forwarded to ComfyUI"));

        assert_eq!(r.raw["type"], "execution_start");
        assert_eq!(r.detail.as_deref(), Some("Forwarded to ComfyUI"));
    }

    #[test]
    fn step_percent_rounds_and_clamps() {
        assert_eq!(step_percent(5.0, 20.0), Some(25));
        assert_eq!(step_percent(1.0, 3.0), Some(33));
        assert_eq!(step_percent(30.0, 20.0), Some(100));
        assert_eq!(step_percent(-2.0, 20.0), Some(0));
    }

    #[test]
    fn step_percent_rejects_bad_input() {
        assert_eq!(step_percent(1.0, 0.0), None);
        assert_eq!(step_percent(f64::NAN, 10.0), None);
        assert_eq!(step_percent(1.0, f64::INFINITY), None);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(JobState::Completed).unwrap(),
            serde_json::json!("completed")
        );
        assert_eq!(JobState::Queued.to_string(), "queued");
    }
}
