//! Scripted driver for exercising the orchestration layer without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use glowgrid_devices::driver::{DatapointMap, DeviceDriver, DriverError, DriverEvent};

/// Driver whose behavior is scripted from the test body.
pub struct ScriptedDriver {
    pub datapoints: Mutex<DatapointMap>,
    pub fail_connect: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_write: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub writes: Mutex<Vec<(String, Value)>>,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl ScriptedDriver {
    pub fn new(datapoints: &[(&str, Value)]) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            datapoints: Mutex::new(
                datapoints
                    .iter()
                    .map(|(id, value)| (id.to_string(), value.clone()))
                    .collect(),
            ),
            fail_connect: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            event_tx,
        }
    }

    pub fn emit(&self, event: DriverEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn recorded_writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("hardware fault 17".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_datapoints(&self) -> Result<DatapointMap, DriverError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(DriverError::Communication("schema read refused".to_string()));
        }
        Ok(self.datapoints.lock().unwrap().clone())
    }

    async fn write_datapoint(
        &self,
        native_id: &str,
        value: Value,
    ) -> Result<DatapointMap, DriverError> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(DriverError::Communication("write refused".to_string()));
        }

        self.writes
            .lock()
            .unwrap()
            .push((native_id.to_string(), value.clone()));

        let mut datapoints = self.datapoints.lock().unwrap();
        datapoints.insert(native_id.to_string(), value);
        Ok(datapoints.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }
}
