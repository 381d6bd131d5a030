//! Process-scoped concurrent job store.
//!
//! The store is the only shared mutable state in the dispatcher. It is
//! written by the forwarder (one record per submission) and by every
//! device's event listener, and read by status queries. Records live in a
//! sharded [`DashMap`], so each operation locks a single shard and
//! per-job mutations are linearizable without a global mutex.
//!
//! Backends identify work by their own prompt id, so the store also keeps
//! a prompt-id index used by [`JobStore::resolve`] to correlate incoming
//! events with job identifiers.

use dashmap::DashMap;

use crate::job::{JobEvent, JobRecord, JobState};
use crate::types::DeviceIndex;

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<String, JobRecord>,
    /// Backend prompt id -> job id.
    prompts: DashMap<String, String>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record for `job_id` if it does not exist yet.
    ///
    /// An existing record is returned unchanged, including its device and
    /// state.
    pub fn upsert(&self, job_id: &str, gpu: DeviceIndex, initial_state: JobState) -> JobRecord {
        let entry = self
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| JobRecord::new(job_id, gpu, initial_state));
        entry.value().clone()
    }

    /// Apply an event to an existing record.
    ///
    /// Events for unknown jobs are dropped. Returns whether a record was
    /// found and updated.
    pub fn apply_event(&self, job_id: &str, event: JobEvent) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(mut record) => {
                let applied = record.apply(event);
                if !applied {
                    tracing::debug!(job_id, "Ignoring stale event");
                }
                applied
            }
            None => {
                tracing::debug!(job_id, "Dropping event for unknown job");
                false
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|r| r.value().clone())
    }

    /// Associate a backend prompt id with a job.
    ///
    /// Returns `false` if the job does not exist.
    pub fn bind_prompt(&self, job_id: &str, prompt_id: &str) -> bool {
        let Some(mut record) = self.jobs.get_mut(job_id) else {
            return false;
        };
        record.prompt_id = Some(prompt_id.to_string());
        drop(record);

        self.prompts
            .insert(prompt_id.to_string(), job_id.to_string());
        true
    }

    /// Map an identifier seen in a backend payload to a job id.
    ///
    /// Prompt ids are tried first; an identifier that is itself a known job
    /// id resolves to itself.
    pub fn resolve(&self, id: &str) -> Option<String> {
        if let Some(job_id) = self.prompts.get(id) {
            return Some(job_id.value().clone());
        }
        self.jobs.contains_key(id).then(|| id.to_string())
    }

    /// Non-terminal jobs on `gpu` that the backend has acknowledged, as
    /// `(job_id, prompt_id)` pairs.
    pub fn open_jobs(&self, gpu: DeviceIndex) -> Vec<(String, String)> {
        self.jobs
            .iter()
            .filter(|r| r.gpu == gpu && !r.state.is_terminal())
            .filter_map(|r| r.prompt_id.clone().map(|p| (r.job_id.clone(), p)))
            .collect()
    }

    /// Move every non-terminal job on `gpu` to [`JobState::Failed`].
    ///
    /// Returns the number of jobs failed.
    pub fn fail_open_jobs(&self, gpu: DeviceIndex, detail: &str) -> usize {
        let mut failed = 0;
        for mut record in self.jobs.iter_mut() {
            if record.gpu != gpu || record.state.is_terminal() {
                continue;
            }
            let event = JobEvent::observed()
                .with_state(JobState::Failed)
                .with_detail(detail);
            if record.apply(event) {
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
