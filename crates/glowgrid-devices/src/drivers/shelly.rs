//! Shelly driver (HTTP).
//!
//! Speaks the Shelly Gen1 local HTTP API: `/shelly` for an identity probe,
//! `/status` for the relay snapshot, and `/relay/<i>?turn=on|off` for
//! writes. Native datapoint ids are relay indices as strings.
//!
//! HTTP has no connection to lose, so "connected" is an assertion that the
//! device answers: a heartbeat task re-probes on an interval and raises
//! `Disconnected` after a few consecutive misses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{DatapointMap, DeviceDriver, DriverError, DriverEvent};

fn default_poll_interval() -> u64 {
    15
}

fn default_timeout() -> u64 {
    5
}

/// Heartbeat misses tolerated before the device is declared gone.
const HEARTBEAT_MISS_LIMIT: u32 = 3;

/// Connection parameters for one Shelly device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellyConfig {
    /// Device hostname or address, optionally with port
    pub host: String,
    /// HTTP auth username (Shelly "restrict login" setting)
    #[serde(default)]
    pub username: Option<String>,
    /// HTTP auth password
    #[serde(default)]
    pub password: Option<String>,
    /// Heartbeat probe interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Driver for a Shelly Gen1 plug or relay.
pub struct ShellyDriver {
    config: ShellyConfig,
    client: Client,
    connected: Arc<AtomicBool>,
    snapshot: StdMutex<DatapointMap>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl ShellyDriver {
    pub fn new(config: ShellyConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_default();

        Self {
            config,
            client,
            connected: Arc::new(AtomicBool::new(false)),
            snapshot: StdMutex::new(DatapointMap::new()),
            heartbeat: Mutex::new(None),
            event_tx,
        }
    }

    /// Build a driver from the free-form `config` block of a device entry.
    pub fn from_config(value: &Value) -> Result<Self, DriverError> {
        let config: ShellyConfig = serde_json::from_value(value.clone())
            .map_err(|e| DriverError::Configuration(e.to_string()))?;
        Ok(Self::new(config))
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.config.host, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, DriverError> {
        let mut request = self.client.get(self.url(path));
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DriverError::Communication(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DriverError::Communication(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DriverError::Communication(format!("JSON parse error: {e}")))
    }

    fn cloned_snapshot(&self) -> DatapointMap {
        self.snapshot
            .lock()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceDriver for ShellyDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(old) = heartbeat.take() {
            old.abort();
        }

        // Identity probe; Shelly answers this without auth.
        self.get_json("/shelly")
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        self.connected.store(true, Ordering::SeqCst);

        let client = self.client.clone();
        let url = self.url("/shelly");
        let auth = (self.config.username.clone(), self.config.password.clone());
        let interval = Duration::from_secs(self.config.poll_interval.max(1));
        let connected = Arc::clone(&self.connected);
        let event_tx = self.event_tx.clone();
        let host = self.config.host.clone();

        *heartbeat = Some(tokio::spawn(async move {
            let mut misses = 0u32;
            loop {
                tokio::time::sleep(interval).await;

                let mut request = client.get(&url);
                if let Some(username) = &auth.0 {
                    request = request.basic_auth(username, auth.1.as_deref());
                }

                match request.send().await {
                    Ok(response) if response.status().is_success() => misses = 0,
                    Ok(response) => {
                        misses += 1;
                        debug!(%host, status = %response.status(), "heartbeat probe failed");
                    }
                    Err(error) => {
                        misses += 1;
                        debug!(%host, %error, "heartbeat probe failed");
                    }
                }

                if misses >= HEARTBEAT_MISS_LIMIT {
                    warn!(%host, "device stopped answering");
                    connected.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(DriverEvent::Disconnected);
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(old) = heartbeat.take() {
            old.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_datapoints(&self) -> Result<DatapointMap, DriverError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::NotConnected);
        }

        let status = self.get_json("/status").await?;
        let datapoints = relay_datapoints(&status);
        if datapoints.is_empty() {
            return Err(DriverError::Communication(
                "device reports no relays".to_string(),
            ));
        }

        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = datapoints.clone();
        }
        Ok(datapoints)
    }

    async fn write_datapoint(
        &self,
        native_id: &str,
        value: Value,
    ) -> Result<DatapointMap, DriverError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::NotConnected);
        }

        let relay: usize = native_id
            .parse()
            .map_err(|_| DriverError::UnknownDatapoint(native_id.to_string()))?;
        let on = value.as_bool().ok_or_else(|| {
            DriverError::Configuration(format!("relay {relay} takes a boolean state"))
        })?;

        let turn = if on { "on" } else { "off" };
        let response = self
            .get_json(&format!("/relay/{relay}?turn={turn}"))
            .await?;

        let ison = response
            .get("ison")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                DriverError::Communication("relay response missing ison".to_string())
            })?;

        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|_| DriverError::Communication("snapshot store poisoned".to_string()))?;
        snapshot.insert(native_id.to_string(), Value::Bool(ison));
        Ok(snapshot.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }
}

/// Extract relay states from a Gen1 `/status` document.
fn relay_datapoints(status: &Value) -> DatapointMap {
    let mut datapoints = DatapointMap::new();
    if let Some(relays) = status.get("relays").and_then(Value::as_array) {
        for (index, relay) in relays.iter().enumerate() {
            if let Some(ison) = relay.get("ison").and_then(Value::as_bool) {
                datapoints.insert(index.to_string(), Value::Bool(ison));
            }
        }
    }
    datapoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relay_datapoints_from_status() {
        let status = json!({
            "wifi_sta": {"connected": true},
            "relays": [
                {"ison": true, "has_timer": false},
                {"ison": false, "has_timer": false}
            ],
            "meters": []
        });

        let datapoints = relay_datapoints(&status);
        assert_eq!(datapoints.len(), 2);
        assert_eq!(datapoints["0"], json!(true));
        assert_eq!(datapoints["1"], json!(false));
    }

    #[test]
    fn test_relay_datapoints_empty_without_relays() {
        assert!(relay_datapoints(&json!({"wifi_sta": {}})).is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config: ShellyConfig =
            serde_json::from_value(json!({"host": "192.168.1.30"})).unwrap();
        assert_eq!(config.poll_interval, 15);
        assert_eq!(config.timeout, 5);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let config: ShellyConfig =
            serde_json::from_value(json!({"host": "192.168.1.30"})).unwrap();
        let driver = ShellyDriver::new(config);
        assert!(matches!(
            driver.write_datapoint("0", json!(true)).await,
            Err(DriverError::NotConnected)
        ));
    }
}
