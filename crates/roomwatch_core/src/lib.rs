//! roomwatch core - Backend logic for the live room monitor
//!
//! This crate contains the monitoring loop, the per-room transition gate,
//! recorder process supervision and the tool installer. It has no HTTP
//! server dependencies; the daemon crate wires it to an admin API.

pub mod config;
pub mod gate;
pub mod installer;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod processor;
pub mod recorder;
pub mod status;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
