//! airscan daemon library.
//!
//! Exposes the daemon's building blocks for integration testing.
//! In production, `airscan-daemon` is used as a binary (main.rs).

pub mod access_log;
pub mod announce;
pub mod cli;
pub mod hotplug;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod transport;
