//! sensorctl-orchestrator: Drives long-running operations against sensors
//!
//! The orchestrator owns one state machine per in-flight operation and a
//! cached copy of the sensor inventory. All mutation happens on a single
//! event loop; every network or SSH call runs on its own task and reports
//! back with a message.

pub mod control_plane;
pub mod error;
pub mod event;
pub mod operation;
pub mod orchestrator;
pub mod probe;
pub mod remote;
pub mod snapshot;
mod tasks;

pub use control_plane::{ControlPlane, HttpControlPlane};
pub use error::{FailureCategory, OperationError};
pub use event::{Command, Event};
pub use orchestrator::{Orchestrator, OrchestratorHandle, Services};
pub use remote::{RemoteRunner, SshGateway};
pub use snapshot::OrchestratorSnapshot;
