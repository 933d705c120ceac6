//! Concrete device driver implementations.
//!
//! Each driver speaks one documented local protocol and satisfies the
//! [`DeviceDriver`](crate::driver::DeviceDriver) contract. Protocol crates
//! are pulled in behind feature gates so a build can drop support it
//! doesn't need.

pub mod simulated;

#[cfg(feature = "http")]
pub mod shelly;

#[cfg(feature = "mqtt")]
pub mod tasmota;

pub use simulated::{SimulatedConfig, SimulatedDriver};

#[cfg(feature = "http")]
pub use shelly::{ShellyConfig, ShellyDriver};

#[cfg(feature = "mqtt")]
pub use tasmota::{TasmotaConfig, TasmotaDriver};
