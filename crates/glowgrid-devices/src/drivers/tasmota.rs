//! Tasmota driver (MQTT).
//!
//! Speaks the documented Tasmota MQTT surface: commands go to
//! `cmnd/<topic>/...`, command acknowledgements and state reports arrive on
//! `stat/<topic>/...`, and the broker-retained `tele/<topic>/LWT` last-will
//! marks the device offline. Relay datapoints are the `POWER` keys
//! (`POWER` on single-relay devices, `POWER1`..`POWERn` on strips).
//!
//! Tasmota acknowledges a write with just the changed key, so the driver
//! keeps a merged snapshot and answers writes from it; that is what makes
//! the contract's "full snapshot returned on write" hold over this
//! protocol.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{DatapointMap, DeviceDriver, DriverError, DriverEvent};

fn default_broker_port() -> u16 {
    1883
}

fn default_response_timeout_ms() -> u64 {
    5000
}

/// Connection parameters for one Tasmota device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasmotaConfig {
    /// MQTT broker hostname or address
    pub broker_host: String,
    /// MQTT broker port
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    /// The device's Tasmota topic (its `%topic%` setting)
    pub topic: String,
    /// Broker username
    #[serde(default)]
    pub username: Option<String>,
    /// Broker password
    #[serde(default)]
    pub password: Option<String>,
    /// How long to wait for the device to answer a command
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Live MQTT session state.
struct Session {
    client: AsyncClient,
    pump: JoinHandle<()>,
}

/// Driver for a Tasmota-firmware outlet or power strip.
pub struct TasmotaDriver {
    config: TasmotaConfig,
    session: Mutex<Option<Session>>,
    snapshot: Arc<StdMutex<DatapointMap>>,
    event_tx: broadcast::Sender<DriverEvent>,
    update_tx: broadcast::Sender<DatapointMap>,
}

impl TasmotaDriver {
    pub fn new(config: TasmotaConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        let (update_tx, _) = broadcast::channel(32);
        Self {
            config,
            session: Mutex::new(None),
            snapshot: Arc::new(StdMutex::new(DatapointMap::new())),
            event_tx,
            update_tx,
        }
    }

    /// Build a driver from the free-form `config` block of a device entry.
    pub fn from_config(value: &Value) -> Result<Self, DriverError> {
        let config: TasmotaConfig = serde_json::from_value(value.clone())
            .map_err(|e| DriverError::Configuration(e.to_string()))?;
        Ok(Self::new(config))
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.config.response_timeout_ms)
    }

    async fn client(&self) -> Result<AsyncClient, DriverError> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(DriverError::NotConnected)
    }

    fn cloned_snapshot(&self) -> DatapointMap {
        self.snapshot
            .lock()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default()
    }

    /// Wait for the next state report, however partial.
    async fn await_update(
        &self,
        updates: &mut broadcast::Receiver<DatapointMap>,
        wanted_id: Option<&str>,
    ) -> Result<(), DriverError> {
        let timeout_ms = self.config.response_timeout_ms;
        let wait = async {
            loop {
                match updates.recv().await {
                    Ok(partial) => match wanted_id {
                        Some(id) if !partial.contains_key(id) => {}
                        _ => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        tokio::time::timeout(self.response_timeout(), wait)
            .await
            .map_err(|_| DriverError::Timeout(timeout_ms))
    }
}

#[async_trait]
impl DeviceDriver for TasmotaDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        let mut session = self.session.lock().await;

        // Replace any half-open previous session.
        if let Some(old) = session.take() {
            old.pump.abort();
        }

        let mut options = MqttOptions::new(
            format!("glowgrid-{}", self.config.topic),
            self.config.broker_host.clone(),
            self.config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);

        // Drive the event loop by hand until the broker acknowledges the
        // session, so connection failures surface here instead of in the
        // background.
        let connack = tokio::time::timeout(self.response_timeout(), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(error) => return Err(DriverError::Connection(error.to_string())),
                }
            }
        })
        .await
        .map_err(|_| DriverError::Timeout(self.config.response_timeout_ms))?;
        connack?;

        client
            .subscribe(format!("stat/{}/#", self.config.topic), QoS::AtLeastOnce)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        client
            .subscribe(format!("tele/{}/LWT", self.config.topic), QoS::AtLeastOnce)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let pump = tokio::spawn(pump(
            eventloop,
            self.config.topic.clone(),
            Arc::clone(&self.snapshot),
            self.event_tx.clone(),
            self.update_tx.clone(),
        ));

        *session = Some(Session { client, pump });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        let mut session = self.session.lock().await;
        if let Some(session) = session.take() {
            let _ = session.client.disconnect().await;
            session.pump.abort();
        }
        Ok(())
    }

    async fn fetch_datapoints(&self) -> Result<DatapointMap, DriverError> {
        let client = self.client().await?;
        let mut updates = self.update_tx.subscribe();

        client
            .publish(
                format!("cmnd/{}/STATE", self.config.topic),
                QoS::AtLeastOnce,
                false,
                "",
            )
            .await
            .map_err(|e| DriverError::Communication(e.to_string()))?;

        self.await_update(&mut updates, None).await?;
        Ok(self.cloned_snapshot())
    }

    async fn write_datapoint(
        &self,
        native_id: &str,
        value: Value,
    ) -> Result<DatapointMap, DriverError> {
        if !native_id.starts_with("POWER") {
            return Err(DriverError::UnknownDatapoint(native_id.to_string()));
        }
        let on = value.as_bool().ok_or_else(|| {
            DriverError::Configuration(format!("datapoint {native_id} takes a boolean state"))
        })?;

        let client = self.client().await?;
        let mut updates = self.update_tx.subscribe();

        client
            .publish(
                format!("cmnd/{}/{}", self.config.topic, native_id),
                QoS::AtLeastOnce,
                false,
                if on { "ON" } else { "OFF" },
            )
            .await
            .map_err(|e| DriverError::Communication(e.to_string()))?;

        self.await_update(&mut updates, Some(native_id)).await?;
        Ok(self.cloned_snapshot())
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }
}

/// Background task pumping the MQTT event loop: routes state reports into
/// the merged snapshot and raises `Disconnected` on broker loss or an
/// offline last-will.
async fn pump(
    mut eventloop: EventLoop,
    topic: String,
    snapshot: Arc<StdMutex<DatapointMap>>,
    event_tx: broadcast::Sender<DriverEvent>,
    update_tx: broadcast::Sender<DatapointMap>,
) {
    let stat_prefix = format!("stat/{topic}/");
    let lwt_topic = format!("tele/{topic}/LWT");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(message))) => {
                if message.topic == lwt_topic {
                    let payload = String::from_utf8_lossy(&message.payload);
                    if payload.eq_ignore_ascii_case("offline") {
                        warn!(%topic, "device published offline last-will");
                        let _ = event_tx.send(DriverEvent::Disconnected);
                    }
                    continue;
                }

                let Some(suffix) = message.topic.strip_prefix(&stat_prefix) else {
                    continue;
                };

                let partial = match serde_json::from_slice::<Value>(&message.payload) {
                    Ok(body) => power_datapoints(&body),
                    // Bare `stat/<topic>/POWERn` responses carry ON/OFF
                    // without JSON framing.
                    Err(_) if suffix.starts_with("POWER") => {
                        let payload = String::from_utf8_lossy(&message.payload);
                        let mut partial = DatapointMap::new();
                        partial.insert(
                            suffix.to_string(),
                            Value::Bool(payload.eq_ignore_ascii_case("on")),
                        );
                        partial
                    }
                    Err(_) => continue,
                };

                if partial.is_empty() {
                    continue;
                }

                if let Ok(mut merged) = snapshot.lock() {
                    merged.extend(partial.clone());
                }
                let _ = update_tx.send(partial);
            }
            Ok(_) => {}
            Err(error) => {
                debug!(%topic, %error, "mqtt event loop error");
                let _ = event_tx.send(DriverEvent::Disconnected);
                break;
            }
        }
    }
}

/// Extract relay datapoints (`POWER*` keys) from a Tasmota JSON report.
fn power_datapoints(body: &Value) -> DatapointMap {
    let mut datapoints = DatapointMap::new();
    if let Some(object) = body.as_object() {
        for (key, value) in object {
            if !key.starts_with("POWER") {
                continue;
            }
            if let Some(state) = value.as_str() {
                datapoints.insert(key.clone(), Value::Bool(state.eq_ignore_ascii_case("on")));
            }
        }
    }
    datapoints
}
