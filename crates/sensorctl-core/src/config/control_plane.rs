//! Control-plane API configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Where and how to reach the sensor inventory API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Base URL; sensor records live at `{base_url}/{name}`
    pub base_url: String,

    /// Static API key sent as `x-api-key`
    pub api_key: String,

    /// Timeout for fetch and delete requests
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout for create requests; provisioning acknowledgement is slow
    #[serde(with = "duration_secs")]
    pub create_timeout: Duration,

    /// Attempts per call before giving up
    pub max_attempts: u32,

    /// Linear backoff unit: attempt N waits N × unit before retrying
    #[serde(with = "duration_secs")]
    pub backoff_unit: Duration,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(10),
            create_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl ControlPlaneConfig {
    /// Base URL without a trailing slash
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
