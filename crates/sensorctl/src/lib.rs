//! sensorctl: Command-line interface for the sensor orchestrator
//!
//! Provides the `sensorctl` CLI. Each invocation loads configuration,
//! starts an in-process orchestrator and renders its snapshots.

pub mod commands;
pub mod output;
pub mod session;
