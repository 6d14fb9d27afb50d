//! Event loop and polling cadence

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Poll intervals and limits used by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval of the loop's own tick message
    #[serde(with = "duration_secs")]
    pub tick: Duration,

    /// Idle inventory refresh interval
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,

    /// Maximum log lines kept per operation
    pub log_capacity: usize,

    /// Deployment: waiting for the API to report running with an address
    #[serde(with = "duration_secs")]
    pub api_poll: Duration,

    /// Deployment: waiting for the SSH port
    #[serde(with = "duration_secs")]
    pub port_poll: Duration,

    /// Deployment: waiting for the SSH service to answer
    #[serde(with = "duration_secs")]
    pub service_poll: Duration,

    /// Deployment: waiting for seeding, which can take over an hour
    #[serde(with = "duration_secs")]
    pub seeding_poll: Duration,

    /// Upgrade: delay before the first progress check
    #[serde(with = "duration_secs")]
    pub upgrade_first_check: Duration,

    /// Upgrade: interval between progress checks
    #[serde(with = "duration_secs")]
    pub upgrade_poll: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
            log_capacity: 20,
            api_poll: Duration::from_secs(30),
            port_poll: Duration::from_secs(10),
            service_poll: Duration::from_secs(10),
            seeding_poll: Duration::from_secs(15),
            upgrade_first_check: Duration::from_secs(5),
            upgrade_poll: Duration::from_secs(10),
        }
    }
}
