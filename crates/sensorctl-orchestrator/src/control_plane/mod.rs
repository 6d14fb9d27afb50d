//! Control-plane client for the sensor inventory API

mod client;
mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sensorctl_core::config::DeployDefaults;
use sensorctl_core::Sensor;

use crate::error::ControlPlaneError;

pub use client::HttpControlPlane;
pub use retry::RetryableCall;

/// Payload for provisioning a new sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub development_branch: String,
    pub team_name: String,
    pub username: String,
}

impl From<&DeployDefaults> for CreateRequest {
    fn from(defaults: &DeployDefaults) -> Self {
        Self {
            development_branch: defaults.branch.clone(),
            team_name: defaults.team.clone(),
            username: defaults.username.clone(),
        }
    }
}

/// Port onto the sensor inventory API
///
/// `fetch`, `create` and `delete` retry internally and fail only once the
/// attempt budget is spent.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current record for `name`; a sensor the API no longer knows comes back
    /// as [`Sensor::deleted`] rather than an error.
    async fn fetch(&self, name: &str) -> Result<Sensor, ControlPlaneError>;

    /// Provision a sensor and return its name
    async fn create(&self, request: &CreateRequest) -> Result<String, ControlPlaneError>;

    async fn delete(&self, name: &str) -> Result<(), ControlPlaneError>;

    /// Whether the API answers at all
    async fn ping(&self) -> bool;
}
