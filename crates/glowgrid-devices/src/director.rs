//! Fleet coordinator.
//!
//! The director owns every controller/form pairing and the routing table
//! from globally-unique field identifiers to `(controller, logical index)`.
//! Identifiers are deterministic functions of config order — `form-<n>`
//! for devices (1-based), `<form-uid>-field-<i>` for fields — so the same
//! config always yields the same external references.
//!
//! Fleet operations isolate failures per device: one outlet being
//! unreachable marks its own form with an error and never touches a
//! sibling.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use glowgrid_core::DeviceSetup;

use crate::controller::DeviceController;
use crate::driver::DriverError;
use crate::factory::{self, DeviceModel, FactoryError};
use crate::form::DeviceForm;

/// Errors returned to callers routing field-level requests.
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    /// Field UID not in the routing table
    #[error("Unable to set state of unknown form field \"{0}\"")]
    UnknownField(String),

    /// The resolved controller's write failed
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// One managed device: its controller and its paired UI form.
struct DeviceEntry {
    controller: DeviceController,
    form: RwLock<DeviceForm>,
}

/// Route from a field UID to its owning device and logical index.
struct FieldRoute {
    entry: Arc<DeviceEntry>,
    index: usize,
}

/// Coordinator for the whole device fleet.
pub struct DeviceDirector {
    entries: IndexMap<String, Arc<DeviceEntry>>,
    field_routes: HashMap<String, FieldRoute>,
}

impl DeviceDirector {
    /// Build the fleet from an ordered device config list.
    ///
    /// Fails fast on the first entry whose maker/model is not in the
    /// registry or whose config block doesn't fit its driver; nothing
    /// network-facing happens here. Must be called from within a Tokio
    /// runtime (controllers spawn their reconnect supervisors on
    /// construction).
    pub fn new(setups: &[DeviceSetup]) -> Result<Self, FactoryError> {
        let mut entries = IndexMap::with_capacity(setups.len());
        let mut field_routes = HashMap::new();

        for (number, setup) in setups.iter().enumerate() {
            let uid = format!("form-{}", number + 1);

            let model = DeviceModel::resolve(&setup.maker, &setup.model)?;
            let controller = factory::build_controller(model, &setup.config)?;
            let form = factory::build_form(model, &uid, &setup.title, &setup.fields);

            let entry = Arc::new(DeviceEntry {
                controller,
                form: RwLock::new(form),
            });

            for index in 0..setup.fields.len() {
                field_routes.insert(
                    format!("{uid}-field-{index}"),
                    FieldRoute {
                        entry: Arc::clone(&entry),
                        index,
                    },
                );
            }

            entries.insert(uid, entry);
        }

        Ok(Self {
            entries,
            field_routes,
        })
    }

    /// Number of managed devices.
    pub fn device_count(&self) -> usize {
        self.entries.len()
    }

    /// Device UIDs in config order.
    pub fn device_uids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Snapshot of every form, in config order.
    pub async fn forms(&self) -> Vec<DeviceForm> {
        let mut forms = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            forms.push(entry.form.read().await.clone());
        }
        forms
    }

    /// Snapshot of one form by device UID.
    pub async fn form(&self, uid: &str) -> Option<DeviceForm> {
        match self.entries.get(uid) {
            Some(entry) => Some(entry.form.read().await.clone()),
            None => None,
        }
    }

    /// Number of devices currently connected.
    pub async fn connected_count(&self) -> usize {
        let mut connected = 0;
        for entry in self.entries.values() {
            if entry.controller.status().await == crate::controller::ConnectionStatus::Connected {
                connected += 1;
            }
        }
        connected
    }

    /// Connect every device, one independent task per device.
    ///
    /// A device that connects gets its live states copied into its form,
    /// index-aligned; a device that fails gets the error message recorded
    /// on its form. Never fails as a whole, and no device blocks another.
    pub async fn connect_all(&self) {
        let mut tasks = JoinSet::new();

        for (uid, entry) in &self.entries {
            let uid = uid.clone();
            let entry = Arc::clone(entry);

            tasks.spawn(async move {
                match entry.controller.connect().await {
                    Ok(()) => {
                        let states = entry.controller.states().await.unwrap_or_default();
                        let mut form = entry.form.write().await;
                        form.clear_error();
                        form.set_states(&states);
                        info!(device = %uid, fields = states.len(), "device connected");
                    }
                    Err(error) => {
                        warn!(device = %uid, %error, "device failed to connect");
                        entry.form.write().await.set_error(error.to_string());
                    }
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                warn!(%error, "connect task aborted");
            }
        }
    }

    /// Disconnect every device, awaiting all.
    ///
    /// Reconnect supervisors are stopped first so teardown never races a
    /// pending retry.
    pub async fn disconnect_all(&self) {
        let mut tasks = JoinSet::new();

        for (uid, entry) in &self.entries {
            let uid = uid.clone();
            let entry = Arc::clone(entry);

            tasks.spawn(async move {
                entry.controller.shutdown();
                entry.controller.disconnect().await;
                entry.form.write().await.clear_states();
                info!(device = %uid, "device disconnected");
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                warn!(%error, "disconnect task aborted");
            }
        }
    }

    /// Route a field-level state change to its controller.
    ///
    /// On success the paired form is re-synced from the controller's
    /// post-write snapshot. Controller failures propagate unmodified.
    pub async fn set_field_state(&self, field_uid: &str, value: Value) -> Result<(), DirectorError> {
        let route = self
            .field_routes
            .get(field_uid)
            .ok_or_else(|| DirectorError::UnknownField(field_uid.to_string()))?;

        route.entry.controller.set_state(route.index, value).await?;

        if let Some(states) = route.entry.controller.states().await {
            route.entry.form.write().await.set_states(&states);
        }
        Ok(())
    }
}
