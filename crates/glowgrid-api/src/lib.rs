//! HTTP surface for the GlowGrid control panel.
//!
//! A deliberately thin layer: the router exposes the device forms for
//! rendering and accepts field-level state changes, everything else is the
//! device layer's business. The UI itself is served separately.

pub mod handlers;
pub mod server;

pub use server::{create_router, run, ServerState};
