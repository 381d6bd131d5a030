//! Multi-device job dispatcher.
//!
//! [`Dispatcher`] owns the process-wide [`JobStore`] and one
//! [`DeviceSlot`] per configured GPU. [`Dispatcher::start`] spawns an
//! [`EventListener`] task per device (connect -> process -> reconnect);
//! submissions, status reads and health probes are served directly from
//! the caller's task.

use std::sync::Arc;
use std::time::Duration;

use cylindria_core::error::CoreError;
use cylindria_core::job::JobRecord;
use cylindria_core::store::JobStore;
use cylindria_core::types::{DeviceIndex, MAX_DEVICES};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::ComfyUIClient;
use crate::config::DispatcherConfig;
use crate::device::DeviceSlot;
use crate::forwarder::{forward, SubmissionResult};
use crate::listener::{EventListener, ListenerSettings};
use crate::prober::{probe, HealthReport};

/// How long shutdown waits for the listener tasks, all together.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Dispatches jobs to a fixed set of ComfyUI backends.
///
/// Created once at startup via [`Dispatcher::start`]. The returned `Arc`
/// can be cloned into request handlers.
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<JobStore>,
    devices: Vec<ManagedDevice>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
    tasks: Mutex<Vec<(DeviceIndex, JoinHandle<()>)>>,
}

/// Internal bookkeeping for a single device.
struct ManagedDevice {
    slot: Arc<DeviceSlot>,
    api: Arc<ComfyUIApi>,
}

impl Dispatcher {
    /// Build the dispatcher without starting any listener.
    ///
    /// Fails if the device count is outside `1..=8` or a device address
    /// cannot be resolved.
    pub fn new(config: DispatcherConfig) -> Result<Self, CoreError> {
        if config.device_count == 0 || config.device_count > MAX_DEVICES {
            return Err(CoreError::Configuration(format!(
                "Device count must be between 1 and {MAX_DEVICES}, got {}",
                config.device_count
            )));
        }

        // One connection pool shared by all devices; every call sets its
        // own timeout.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let devices = (0..config.device_count)
            .map(|index| {
                let slot = DeviceSlot::new(index, &config.base_url)?;
                let api = ComfyUIApi::with_client(http.clone(), slot.api_url().clone());
                Ok(ManagedDevice {
                    slot: Arc::new(slot),
                    api: Arc::new(api),
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self {
            config,
            store: Arc::new(JobStore::new()),
            devices,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build the dispatcher and spawn one event listener per device.
    pub async fn start(config: DispatcherConfig) -> Result<Arc<Self>, CoreError> {
        let dispatcher = Arc::new(Self::new(config)?);
        dispatcher.spawn_listeners().await;

        tracing::info!(
            devices = dispatcher.device_count(),
            base_url = %dispatcher.config.base_url,
            "Dispatcher started",
        );
        Ok(dispatcher)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The slot for `device`, or [`CoreError::InvalidDevice`].
    pub fn slot(&self, device: DeviceIndex) -> Result<&Arc<DeviceSlot>, CoreError> {
        self.managed(device).map(|m| &m.slot)
    }

    /// Record `job_id` on `device` and forward its workflow.
    ///
    /// Only an invalid device is an error, and it leaves the store
    /// untouched. Backend failures are reported in the result.
    pub async fn submit(
        &self,
        job_id: &str,
        device: DeviceIndex,
        payload: &serde_json::Value,
    ) -> Result<SubmissionResult, CoreError> {
        let managed = self.managed(device)?;
        let result = forward(
            &self.store,
            &managed.slot,
            &managed.api,
            job_id,
            payload,
            self.config.forward_timeout,
        )
        .await;
        Ok(result)
    }

    pub fn status(&self, job_id: &str) -> Option<JobRecord> {
        self.store.get(job_id)
    }

    /// Probe the backend behind `device`.
    pub async fn health(&self, device: DeviceIndex) -> Result<HealthReport, CoreError> {
        let managed = self.managed(device)?;
        Ok(probe(&managed.slot, &managed.api, self.config.probe_timeout).await)
    }

    /// Probe every device concurrently.
    pub async fn health_all(&self) -> Vec<HealthReport> {
        let probes = self
            .devices
            .iter()
            .map(|m| probe(&m.slot, &m.api, self.config.probe_timeout));
        futures::future::join_all(probes).await
    }

    /// Stop all listeners.
    ///
    /// Cancels the master token, then waits up to 5 seconds in total for
    /// the listeners to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down dispatcher");
        self.cancel.cancel();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        join_listeners(tasks, SHUTDOWN_TIMEOUT).await;

        tracing::info!("Dispatcher shut down complete");
    }

    // ---- private helpers ----

    fn managed(&self, device: DeviceIndex) -> Result<&ManagedDevice, CoreError> {
        self.devices.get(device).ok_or(CoreError::InvalidDevice {
            device,
            device_count: self.devices.len(),
        })
    }

    async fn spawn_listeners(&self) {
        let settings = ListenerSettings::from(&self.config);
        let mut tasks = self.tasks.lock().await;

        for managed in &self.devices {
            let slot = Arc::clone(&managed.slot);
            let device = slot.index();
            let client = ComfyUIClient::new(device, slot.ws_url().clone(), self.config.connect_timeout);
            let listener = EventListener::new(
                slot,
                client,
                Arc::clone(&managed.api),
                Arc::clone(&self.store),
                settings.clone(),
            );
            let cancel = self.cancel.child_token();

            let handle = tokio::spawn(async move {
                tracing::info!(device, "Starting event listener");
                listener.run(cancel).await;
            });
            tasks.push((device, handle));
        }
    }
}

/// Wait for every listener task at once; stragglers are aborted after
/// `timeout`.
async fn join_listeners(mut tasks: Vec<(DeviceIndex, JoinHandle<()>)>, timeout: Duration) {
    let all = futures::future::join_all(tasks.iter_mut().map(|(_, handle)| handle));
    if tokio::time::timeout(timeout, all).await.is_ok() {
        return;
    }

    for (device, handle) in tasks {
        if !handle.is_finished() {
            tracing::warn!(device, "Event listener did not stop in time");
            handle.abort();
        }
    }
}
