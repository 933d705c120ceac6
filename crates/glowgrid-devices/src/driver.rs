//! The device driver capability contract.
//!
//! A driver is the component that actually speaks a device's wire protocol.
//! The rest of the crate never sees protocol details: a controller holds a
//! `dyn DeviceDriver` and works purely in terms of native datapoint ids and
//! JSON values. Drivers are expected to emit [`DriverEvent::Disconnected`]
//! whenever an established connection drops, at any time after construction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Full device state keyed by the protocol's native datapoint id.
///
/// Native ids are protocol-specific: Tasmota uses `POWER`/`POWER1`/...,
/// Shelly uses relay indices, Tuya-style protocols use numeric `dps` keys.
/// They are carried as strings throughout.
pub type DatapointMap = BTreeMap<String, Value>;

/// Asynchronous events a driver can raise after construction.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// An established connection was lost.
    Disconnected,
    /// A transient protocol-level error. Carries the display message.
    Error(String),
}

/// Errors raised by driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Driver configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request failed on an established connection
    #[error("Communication error: {0}")]
    Communication(String),

    /// Operation requires a connection that is not open
    #[error("Device not connected")]
    NotConnected,

    /// Device did not answer in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Datapoint id the device does not report
    #[error("Unknown datapoint: {0}")]
    UnknownDatapoint(String),

    /// Other error
    #[error("Driver error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Capability contract for one physical device.
///
/// Implementations must be cheap to share (`&self` methods) and must not
/// assume calls arrive in any particular order: `fetch_datapoints` or
/// `write_datapoint` on a driver that never connected should fail with
/// [`DriverError::NotConnected`] rather than panic.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Open the connection to the device.
    ///
    /// Reconnects are expressed as another `connect()` call; a driver with a
    /// half-open previous session tears it down first.
    async fn connect(&self) -> Result<(), DriverError>;

    /// Close the connection. Safe to call when not connected.
    async fn disconnect(&self) -> Result<(), DriverError>;

    /// Read the device's full current state.
    async fn fetch_datapoints(&self) -> Result<DatapointMap, DriverError>;

    /// Write a single datapoint.
    ///
    /// The returned map is the authoritative full post-write snapshot; the
    /// caller uses it instead of issuing a fresh read.
    async fn write_datapoint(&self, native_id: &str, value: Value)
        -> Result<DatapointMap, DriverError>;

    /// Subscribe to asynchronous disconnect/error events.
    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;
}

/// Native datapoint ids of a snapshot in presentation order: numeric ids
/// ascending first, then named ids lexicographically.
///
/// The logical field order of a device is derived from this exactly once,
/// at the first successful state fetch, so it must be a pure function of
/// the snapshot's key set.
pub fn ordered_native_ids(snapshot: &DatapointMap) -> Vec<String> {
    let mut ids: Vec<&String> = snapshot.keys().collect();
    ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    ids.into_iter().cloned().collect()
}
