//! SSH configuration for the remote command gateway

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Key files tried, in order, when no key path is configured
const DEFAULT_KEY_NAMES: &[&str] = &["id_ed25519", "id_rsa"];

/// How to authenticate and connect to sensors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote login user
    pub username: String,

    /// Password authentication; used only when no key is available
    pub password: Option<String>,

    /// Private key for authentication
    pub private_key_path: Option<PathBuf>,

    /// SSH port on the sensors
    pub port: u16,

    /// Connection timeout; generous because upgrades keep sensors busy
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for the bare TCP reachability probe
    #[serde(with = "duration_secs")]
    pub port_probe_timeout: Duration,

    /// Upper bound on one remote command, from exec to exit status
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Keepalive period; a peer that misses several in a row is dropped
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: "broala".to_string(),
            password: None,
            private_key_path: None,
            port: 22,
            connect_timeout: Duration::from_secs(30),
            port_probe_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(600),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

impl SshConfig {
    /// The key to authenticate with: the configured path, else the first
    /// default key found under `~/.ssh`.
    pub fn resolve_key_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.private_key_path {
            return Some(path.clone());
        }
        let ssh_dir = dirs::home_dir()?.join(".ssh");
        DEFAULT_KEY_NAMES
            .iter()
            .map(|name| ssh_dir.join(name))
            .find(|path| path.exists())
    }
}
