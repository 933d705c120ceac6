//! Device connection and orchestration layer for GlowGrid.
//!
//! This crate turns a heterogeneous fleet of smart outlets and switches into
//! one uniform control surface:
//!
//! - **DeviceDriver**: the capability contract a protocol implementation must
//!   satisfy (connect, disconnect, full-state read, single-datapoint write,
//!   asynchronous disconnect/error events).
//! - **DeviceController**: wraps one driver; owns the device's last-known
//!   state snapshot and the logical-index-to-native-id table; keeps the
//!   connection alive with an unbounded reconnect supervisor.
//! - **DeviceForm**: the UI-facing descriptor paired with each controller.
//! - **DeviceModel** registry: closed maker/model table resolved and
//!   validated before any network activity.
//! - **DeviceDirector**: owns the whole fleet, fans out connect/disconnect,
//!   and routes field-level writes to the right controller while isolating
//!   per-device failures.
//!
//! Protocol support is feature-gated: `mqtt` (Tasmota devices via rumqttc)
//! and `http` (Shelly devices via reqwest) are both on by default; the
//! `virtual` driver for demos and tests is always available.

pub mod controller;
pub mod director;
pub mod driver;
pub mod drivers;
pub mod factory;
pub mod form;

pub use controller::{ConnectionStatus, DeviceController};
pub use director::{DeviceDirector, DirectorError};
pub use driver::{DatapointMap, DeviceDriver, DriverError, DriverEvent};
pub use factory::{DeviceModel, FactoryError};
pub use form::{DeviceForm, FieldKind, FormField};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
