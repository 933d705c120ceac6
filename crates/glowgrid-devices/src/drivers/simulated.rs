//! Simulated in-process driver.
//!
//! Backs the `virtual` maker: a device that lives entirely in memory, for
//! demoing the panel without hardware and for exercising the orchestration
//! layer in tests. The `offline` flag makes connects fail the way an
//! unreachable device would, so error rendering can be seen end-to-end.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::driver::{DatapointMap, DeviceDriver, DriverError, DriverEvent};

fn default_datapoints() -> BTreeMap<String, Value> {
    let mut datapoints = BTreeMap::new();
    datapoints.insert("1".to_string(), Value::Bool(false));
    datapoints
}

/// Configuration for a simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Initial datapoints, keyed by native id
    #[serde(default = "default_datapoints")]
    pub datapoints: BTreeMap<String, Value>,
    /// Artificial connect latency
    #[serde(default)]
    pub connect_latency_ms: u64,
    /// Pretend the device is unreachable
    #[serde(default)]
    pub offline: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            datapoints: default_datapoints(),
            connect_latency_ms: 0,
            offline: false,
        }
    }
}

/// In-memory device.
pub struct SimulatedDriver {
    connect_latency: Duration,
    offline: bool,
    connected: AtomicBool,
    datapoints: Mutex<DatapointMap>,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl SimulatedDriver {
    pub fn new(config: SimulatedConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            connect_latency: Duration::from_millis(config.connect_latency_ms),
            offline: config.offline,
            connected: AtomicBool::new(false),
            datapoints: Mutex::new(config.datapoints),
            event_tx,
        }
    }

    fn snapshot(&self) -> DatapointMap {
        self.datapoints
            .lock()
            .map(|datapoints| datapoints.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceDriver for SimulatedDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        if self.connect_latency > Duration::ZERO {
            tokio::time::sleep(self.connect_latency).await;
        }
        if self.offline {
            return Err(DriverError::Connection("device is offline".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_datapoints(&self) -> Result<DatapointMap, DriverError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::NotConnected);
        }
        Ok(self.snapshot())
    }

    async fn write_datapoint(
        &self,
        native_id: &str,
        value: Value,
    ) -> Result<DatapointMap, DriverError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::NotConnected);
        }

        let mut datapoints = self
            .datapoints
            .lock()
            .map_err(|_| DriverError::Communication("datapoint store poisoned".to_string()))?;
        if !datapoints.contains_key(native_id) {
            return Err(DriverError::UnknownDatapoint(native_id.to_string()));
        }
        datapoints.insert(native_id.to_string(), value);
        Ok(datapoints.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_requires_connect() {
        let driver = SimulatedDriver::new(SimulatedConfig::default());
        assert!(matches!(
            driver.fetch_datapoints().await,
            Err(DriverError::NotConnected)
        ));

        driver.connect().await.unwrap();
        assert_eq!(driver.fetch_datapoints().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_connect_fails() {
        let config = SimulatedConfig {
            offline: true,
            ..SimulatedConfig::default()
        };
        let driver = SimulatedDriver::new(config);
        assert!(matches!(
            driver.connect().await,
            Err(DriverError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_write_returns_full_snapshot() {
        let mut datapoints = BTreeMap::new();
        datapoints.insert("1".to_string(), json!(false));
        datapoints.insert("2".to_string(), json!(true));
        let driver = SimulatedDriver::new(SimulatedConfig {
            datapoints,
            ..SimulatedConfig::default()
        });

        driver.connect().await.unwrap();
        let snapshot = driver.write_datapoint("1", json!(true)).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["1"], json!(true));
        assert_eq!(snapshot["2"], json!(true));

        assert!(matches!(
            driver.write_datapoint("9", json!(true)).await,
            Err(DriverError::UnknownDatapoint(_))
        ));
    }
}
