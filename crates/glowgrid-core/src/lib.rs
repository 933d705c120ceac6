//! Shared configuration model for the GlowGrid control panel.
//!
//! This crate holds the types every other crate agrees on: the application
//! config file format and the per-device setup entries the device layer is
//! constructed from. It deliberately knows nothing about protocols or HTTP;
//! it only describes what the operator wrote down.

pub mod config;

pub use config::{AppConfig, ConfigError, DeviceSetup, Theme};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
