//! Per-device controller.
//!
//! A controller wraps one [`DeviceDriver`] and normalizes it into
//! get/set-by-logical-index semantics. It owns the device's last-known state
//! snapshot and the table mapping logical field positions to the driver's
//! native datapoint ids. That table is derived from the first successful
//! state fetch and frozen for the controller's lifetime, so field indices
//! handed out to the UI stay valid across reconnects.
//!
//! Availability over giving up: a disconnected physical device is assumed to
//! eventually come back, so the reconnect supervisor retries forever on a
//! constant interval. Exactly one supervisor task runs per controller;
//! disconnect signals that arrive while a reconnect attempt is already in
//! flight are coalesced instead of stacking extra timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::{ordered_native_ids, DeviceDriver, DriverError, DriverEvent};

/// Default delay between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Connection lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot state guarded by one lock so status, states, and the field
/// table can never be observed mid-update.
struct Snapshot {
    /// Logical index -> native datapoint id. Frozen after the first
    /// successful fetch.
    native_ids: Option<Arc<[String]>>,
    /// Last known field states, in logical order. `None` when not
    /// connected.
    states: Option<Vec<Value>>,
    status: ConnectionStatus,
    last_seen: Option<DateTime<Utc>>,
}

struct ControllerInner {
    driver: Arc<dyn DeviceDriver>,
    snapshot: Mutex<Snapshot>,
    retry_delay: Duration,
}

/// Protocol-agnostic adapter for one device.
pub struct DeviceController {
    inner: Arc<ControllerInner>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceController {
    /// Wrap a driver with the default reconnect delay.
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self::with_retry_delay(driver, DEFAULT_RETRY_DELAY)
    }

    /// Wrap a driver with an explicit reconnect delay.
    pub fn with_retry_delay(driver: Arc<dyn DeviceDriver>, retry_delay: Duration) -> Self {
        let events = driver.subscribe();
        let inner = Arc::new(ControllerInner {
            driver,
            snapshot: Mutex::new(Snapshot {
                native_ids: None,
                states: None,
                status: ConnectionStatus::Disconnected,
                last_seen: None,
            }),
            retry_delay,
        });

        let supervisor = tokio::spawn(supervise(Arc::clone(&inner), events));

        Self {
            inner,
            supervisor: std::sync::Mutex::new(Some(supervisor)),
        }
    }

    /// Connect the device and load its initial state.
    ///
    /// Driver failures are normalized to their display message before
    /// propagation; on failure the local snapshot stays cleared.
    pub async fn connect(&self) -> Result<(), DriverError> {
        self.inner.connect().await
    }

    /// Disconnect and clear the local snapshot.
    ///
    /// The driver's own disconnect is issued as a detached task: clearing
    /// local state is never blocked on a network acknowledgement from a
    /// device that may already be gone.
    pub async fn disconnect(&self) {
        let driver = Arc::clone(&self.inner.driver);
        tokio::spawn(async move {
            if let Err(error) = driver.disconnect().await {
                debug!(%error, "driver disconnect did not settle cleanly");
            }
        });

        let mut snapshot = self.inner.snapshot.lock().await;
        snapshot.states = None;
        snapshot.status = ConnectionStatus::Disconnected;
    }

    /// Last known field states in logical order, `None` when not connected.
    pub async fn states(&self) -> Option<Vec<Value>> {
        self.inner.snapshot.lock().await.states.clone()
    }

    /// Number of fields the device reported, once known.
    pub async fn field_count(&self) -> Option<usize> {
        self.inner
            .snapshot
            .lock()
            .await
            .native_ids
            .as_ref()
            .map(|ids| ids.len())
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.inner.snapshot.lock().await.status
    }

    /// Timestamp of the last successful driver traffic.
    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.inner.snapshot.lock().await.last_seen
    }

    /// Write one field and refresh the snapshot from the write's response.
    ///
    /// Driver errors propagate unmodified and leave the snapshot at its
    /// last known value.
    pub async fn set_state(&self, index: usize, value: Value) -> Result<(), DriverError> {
        let native_id = {
            let snapshot = self.inner.snapshot.lock().await;
            let ids = snapshot.native_ids.as_ref().ok_or(DriverError::NotConnected)?;
            ids.get(index)
                .cloned()
                .ok_or_else(|| DriverError::UnknownDatapoint(format!("field index {index}")))?
        };

        let response = self.inner.driver.write_datapoint(&native_id, value).await?;

        let mut snapshot = self.inner.snapshot.lock().await;
        if let Some(ids) = snapshot.native_ids.clone() {
            snapshot.states = Some(project(&ids, &response));
        }
        snapshot.last_seen = Some(Utc::now());
        Ok(())
    }

    /// Stop the reconnect supervisor, cancelling any pending retry.
    ///
    /// Called by the director during teardown so a stopping process never
    /// races a reconnect attempt against its own shutdown.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.supervisor.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ControllerInner {
    async fn connect(&self) -> Result<(), DriverError> {
        {
            let mut snapshot = self.snapshot.lock().await;
            snapshot.status = ConnectionStatus::Connecting;
        }

        match self.try_connect().await {
            Ok(()) => Ok(()),
            Err(error) => {
                let mut snapshot = self.snapshot.lock().await;
                snapshot.states = None;
                snapshot.status = ConnectionStatus::Disconnected;
                Err(error)
            }
        }
    }

    async fn try_connect(&self) -> Result<(), DriverError> {
        self.driver
            .connect()
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let datapoints = self
            .driver
            .fetch_datapoints()
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let mut snapshot = self.snapshot.lock().await;
        if snapshot.native_ids.is_none() {
            snapshot.native_ids = Some(ordered_native_ids(&datapoints).into());
        }
        // The table never changes after it is first derived; later connects
        // only re-project states through it.
        if let Some(ids) = snapshot.native_ids.clone() {
            snapshot.states = Some(project(&ids, &datapoints));
        }
        snapshot.status = ConnectionStatus::Connected;
        snapshot.last_seen = Some(Utc::now());
        Ok(())
    }
}

/// Project a native-keyed snapshot into logical field order. Datapoints the
/// device stopped reporting come back as null rather than shifting later
/// fields.
fn project(native_ids: &[String], datapoints: &crate::driver::DatapointMap) -> Vec<Value> {
    native_ids
        .iter()
        .map(|id| datapoints.get(id).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Reconnect supervisor: one per controller, running until shutdown.
async fn supervise(inner: Arc<ControllerInner>, mut events: broadcast::Receiver<DriverEvent>) {
    loop {
        match events.recv().await {
            Ok(DriverEvent::Error(message)) => {
                // Drivers emit transient errors that don't always warrant
                // action; they are logged and swallowed.
                debug!(%message, "driver error event");
            }
            Ok(DriverEvent::Disconnected) => {
                warn!("device connection lost, scheduling reconnect");
                {
                    let mut snapshot = inner.snapshot.lock().await;
                    snapshot.states = None;
                    snapshot.status = ConnectionStatus::Disconnected;
                }

                loop {
                    tokio::time::sleep(inner.retry_delay).await;
                    match inner.connect().await {
                        Ok(()) => {
                            info!("device reconnected");
                            break;
                        }
                        Err(error) => {
                            warn!(%error, "reconnect attempt failed, retrying");
                        }
                    }
                }

                // Disconnect signals raised while the retry loop was running
                // describe the connection we just replaced; drop them.
                loop {
                    match events.try_recv() {
                        Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                        Err(_) => break,
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "driver event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
