//! Defaults for individual operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Location of the local sensor inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Newline-delimited sensor names
    pub path: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".sensors"),
        }
    }
}

/// Payload defaults for creating a sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployDefaults {
    pub branch: String,
    pub team: String,
    pub username: String,
}

impl Default for DeployDefaults {
    fn default() -> Self {
        Self {
            branch: "testing".to_string(),
            team: "cicd".to_string(),
            username: whoami::username(),
        }
    }
}

/// Fleet manager the registration script points sensors at
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub address: String,
    pub port: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            address: "192.168.22.239".to_string(),
            port: 4443,
        }
    }
}
