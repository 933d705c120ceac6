//! Closed maker/model registry.
//!
//! Every supported device is a `(maker, model)` pair resolved to a
//! [`DeviceModel`] variant before any network activity, so an unsupported
//! combination fails Director construction instead of surfacing per-device
//! at runtime. Controller and form construction are total over a resolved
//! model.

use std::sync::Arc;

use serde_json::Value;

use crate::controller::DeviceController;
use crate::driver::{DeviceDriver, DriverError};
use crate::form::{DeviceForm, FieldKind};

/// Errors raised while resolving or constructing a device pairing.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// Maker tag not in the registry
    #[error("Unknown device maker \"{0}\"")]
    UnknownMaker(String),

    /// Model tag not in the registry for this maker
    #[error("Unknown model \"{model}\" for device maker \"{maker}\"")]
    UnknownModel { maker: String, model: String },

    /// Device config block does not fit the driver's config shape
    #[error("Invalid config for {maker} {model}: {reason}")]
    Config {
        maker: String,
        model: String,
        reason: String,
    },
}

/// A supported maker/model pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceModel {
    /// Tasmota-firmware single outlet (MQTT)
    #[cfg(feature = "mqtt")]
    TasmotaOutlet,
    /// Tasmota-firmware multi-relay power strip (MQTT)
    #[cfg(feature = "mqtt")]
    TasmotaStrip,
    /// Shelly Gen1 plug (HTTP)
    #[cfg(feature = "http")]
    ShellyPlug,
    /// Simulated in-process outlet
    VirtualOutlet,
}

impl DeviceModel {
    /// Resolve a maker/model tag pair against the registry.
    pub fn resolve(maker: &str, model: &str) -> Result<Self, FactoryError> {
        let unknown_model = || FactoryError::UnknownModel {
            maker: maker.to_string(),
            model: model.to_string(),
        };

        match maker {
            #[cfg(feature = "mqtt")]
            "tasmota" => match model {
                "outlet" => Ok(Self::TasmotaOutlet),
                "strip" => Ok(Self::TasmotaStrip),
                _ => Err(unknown_model()),
            },
            #[cfg(feature = "http")]
            "shelly" => match model {
                "plug" => Ok(Self::ShellyPlug),
                _ => Err(unknown_model()),
            },
            "virtual" => match model {
                "outlet" => Ok(Self::VirtualOutlet),
                _ => Err(unknown_model()),
            },
            _ => Err(FactoryError::UnknownMaker(maker.to_string())),
        }
    }

    /// The registry as `(maker, model)` tags, for startup validation
    /// listings.
    pub fn supported() -> Vec<(&'static str, &'static str)> {
        let mut pairings = Vec::new();
        #[cfg(feature = "mqtt")]
        {
            pairings.push(("tasmota", "outlet"));
            pairings.push(("tasmota", "strip"));
        }
        #[cfg(feature = "http")]
        pairings.push(("shelly", "plug"));
        pairings.push(("virtual", "outlet"));
        pairings
    }

    /// The maker/model tags this variant answers to.
    pub fn tags(&self) -> (&'static str, &'static str) {
        match self {
            #[cfg(feature = "mqtt")]
            Self::TasmotaOutlet => ("tasmota", "outlet"),
            #[cfg(feature = "mqtt")]
            Self::TasmotaStrip => ("tasmota", "strip"),
            #[cfg(feature = "http")]
            Self::ShellyPlug => ("shelly", "plug"),
            Self::VirtualOutlet => ("virtual", "outlet"),
        }
    }

    /// Control kind this model's fields render as.
    pub fn field_kind(&self) -> FieldKind {
        FieldKind::Boolean
    }

    fn build_driver(&self, config: &Value) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        match self {
            #[cfg(feature = "mqtt")]
            Self::TasmotaOutlet | Self::TasmotaStrip => Ok(Arc::new(
                crate::drivers::tasmota::TasmotaDriver::from_config(config)?,
            )),
            #[cfg(feature = "http")]
            Self::ShellyPlug => Ok(Arc::new(crate::drivers::shelly::ShellyDriver::from_config(
                config,
            )?)),
            Self::VirtualOutlet => Ok(Arc::new(
                crate::drivers::simulated::SimulatedDriver::new(
                    serde_json::from_value(config.clone())
                        .map_err(|e| DriverError::Configuration(e.to_string()))?,
                ),
            )),
        }
    }
}

/// A null config block means "all defaults".
fn normalize_config(config: &Value) -> Value {
    if config.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    }
}

/// Build the controller (driver included) for a resolved model.
pub fn build_controller(
    model: DeviceModel,
    config: &Value,
) -> Result<DeviceController, FactoryError> {
    let (maker, model_tag) = model.tags();
    let driver = model
        .build_driver(&normalize_config(config))
        .map_err(|e| FactoryError::Config {
            maker: maker.to_string(),
            model: model_tag.to_string(),
            reason: e.to_string(),
        })?;
    Ok(DeviceController::new(driver))
}

/// Build the UI form for a resolved model.
pub fn build_form(
    model: DeviceModel,
    uid: impl Into<String>,
    title: impl Into<String>,
    field_names: &[String],
) -> DeviceForm {
    DeviceForm::new(uid, title, model.field_kind(), field_names)
}
