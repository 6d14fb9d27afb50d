//! Read-only views published for presentation
//!
//! The loop rebuilds an [`OrchestratorSnapshot`] after every event and sends
//! it on a `watch` channel. Presentation reads snapshots and never touches
//! the live state.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use sensorctl_core::Sensor;

use crate::operation::{LogEntry, OperationKey, OperationState, Phase, UpgradeInfo};

/// One operation as presentation sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationView {
    pub key: OperationKey,
    pub phase: Phase,
    pub log: Vec<LogEntry>,
    pub active: bool,
    pub detached: bool,
    pub last_error: Option<String>,
    pub elapsed: Duration,
    pub phase_elapsed: Duration,
}

impl OperationView {
    pub fn succeeded(&self) -> bool {
        !self.active && !self.phase.is_failed()
    }
}

impl From<&OperationState> for OperationView {
    fn from(op: &OperationState) -> Self {
        Self {
            key: op.key().clone(),
            phase: op.phase(),
            log: op.log().iter().cloned().collect(),
            active: op.is_active(),
            detached: op.is_detached(),
            last_error: op.last_error().map(str::to_string),
            elapsed: op.elapsed(),
            phase_elapsed: op.phase_elapsed(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    /// Cached inventory, oldest first
    pub sensors: Vec<Sensor>,
    pub operations: Vec<OperationView>,
    /// Loaded upgrade information by sensor name
    pub upgrade_info: BTreeMap<String, UpgradeInfo>,
    /// Last informational message
    pub status: Option<String>,
    /// Last error message
    pub error: Option<String>,
    /// `None` until the first connectivity check
    pub api_online: Option<bool>,
    /// At least one refresh has completed
    pub loaded: bool,
    /// Why the most recent refresh could not read the inventory file
    pub load_error: Option<String>,
    pub refreshing: bool,
}

impl OrchestratorSnapshot {
    pub fn sensor(&self, name: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.name == name)
    }

    pub fn operation(&self, key: &OperationKey) -> Option<&OperationView> {
        self.operations.iter().find(|op| &op.key == key)
    }

    /// Operations not dismissed by the user
    pub fn visible_operations(&self) -> impl Iterator<Item = &OperationView> {
        self.operations.iter().filter(|op| !op.detached)
    }

    pub fn active_count(&self) -> usize {
        self.operations.iter().filter(|op| op.active).count()
    }
}
