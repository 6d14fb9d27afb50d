//! sensorctl-core: Core abstractions and configuration for sensorctl
//!
//! This crate provides the sensor domain types, configuration structures,
//! error taxonomy and the local inventory file shared by the orchestrator
//! and the CLI.

pub mod config;
pub mod error;
pub mod inventory;
pub mod time;
pub mod types;

pub use error::SensorctlError;
pub use inventory::InventoryFile;
pub use types::{Sensor, SensorMetrics, SensorStatus};
