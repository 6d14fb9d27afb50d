//! Messages consumed by the orchestrator loop

use tokio::sync::oneshot;

use sensorctl_core::Sensor;

use crate::control_plane::CreateRequest;
use crate::error::OperationError;
use crate::operation::oneshot::ActionFailure;
use crate::operation::{DeployProbe, OperationKey, TrafficAction, UpgradeInfo, UpgradeObservation};
use crate::probe::ProbeResult;

/// Reply channel for a submitted command. Commands that start or touch an
/// operation answer with its key.
pub type Reply = oneshot::Sender<Result<Option<OperationKey>, OperationError>>;

/// User-initiated requests
#[derive(Debug, Clone)]
pub enum Command {
    Deploy(CreateRequest),
    Delete { sensor: String },
    /// Read-only upgrade information, required before `StartUpgrade`
    LoadUpgradeInfo { sensor: String },
    /// `version: None` applies the latest available update
    StartUpgrade { sensor: String, version: Option<String> },
    EnableFeatures { sensor: String },
    AddToFleet { sensor: String },
    ConfigureTraffic { sensor: String, action: TrafficAction },
    /// Soft cancel: hide the operation, keep driving it
    Dismiss(OperationKey),
    Refresh,
}

/// Everything that can wake the loop
#[derive(Debug)]
pub enum Event {
    Command {
        command: Command,
        reply: Option<Reply>,
    },

    /// Scheduler heartbeat
    Tick,

    /// Inventory refresh finished
    InventoryLoaded {
        sensors: Vec<Sensor>,
        /// Names dropped because the control plane reported them deleted
        removed: Vec<String>,
        api_online: bool,
    },

    /// Inventory file could not be read
    InventoryFailed { error: String },

    /// Metrics collection for one sensor finished
    MetricsCollected {
        sensor: String,
        metrics: Result<sensorctl_core::SensorMetrics, String>,
    },

    /// Create call returned; `Ok` carries the new sensor name
    DeployCreated {
        key: OperationKey,
        result: Result<String, String>,
    },

    DeployProbed { key: OperationKey, probe: DeployProbe },

    /// Deployment reached ready; emitted by the loop itself
    DeployCompleted { key: OperationKey, sensor: String, address: String },

    UpgradeInfoLoaded {
        sensor: String,
        result: Result<UpgradeInfo, String>,
    },

    UpgradeLaunched {
        key: OperationKey,
        result: Result<(), String>,
    },

    UpgradeObserved {
        key: OperationKey,
        observation: UpgradeObservation,
    },

    PreconditionChecked {
        key: OperationKey,
        result: ProbeResult<()>,
    },

    /// One-shot action returned; `Ok` carries its output
    OneShotFinished {
        key: OperationKey,
        result: Result<String, ActionFailure>,
    },
}

impl Event {
    /// Short label for tracing
    pub fn name(&self) -> &'static str {
        match self {
            Event::Command { .. } => "command",
            Event::Tick => "tick",
            Event::InventoryLoaded { .. } => "inventory-loaded",
            Event::InventoryFailed { .. } => "inventory-failed",
            Event::MetricsCollected { .. } => "metrics-collected",
            Event::DeployCreated { .. } => "deploy-created",
            Event::DeployProbed { .. } => "deploy-probed",
            Event::DeployCompleted { .. } => "deploy-completed",
            Event::UpgradeInfoLoaded { .. } => "upgrade-info-loaded",
            Event::UpgradeLaunched { .. } => "upgrade-launched",
            Event::UpgradeObserved { .. } => "upgrade-observed",
            Event::PreconditionChecked { .. } => "precondition-checked",
            Event::OneShotFinished { .. } => "oneshot-finished",
        }
    }
}
