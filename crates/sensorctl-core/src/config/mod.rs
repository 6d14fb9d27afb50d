//! Configuration management for sensorctl

mod control_plane;
mod operations;
pub mod serde_utils;
mod ssh;
mod timing;

pub use control_plane::ControlPlaneConfig;
pub use operations::{DeployDefaults, FleetConfig, InventoryConfig};
pub use ssh::SshConfig;
pub use timing::TimingConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorctl")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Complete configuration file, one table per concern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub control_plane: ControlPlaneConfig,
    pub ssh: SshConfig,
    pub inventory: InventoryConfig,
    pub timing: TimingConfig,
    pub deploy: DeployDefaults,
    pub fleet: FleetConfig,
}

impl Config {
    /// Check that the settings needed to talk to the control plane are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_plane.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "control_plane.base_url (EC2_SENSOR_BASE_URL)".to_string(),
            ));
        }
        if self.control_plane.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "control_plane.api_key (EC2_SENSOR_API_KEY)".to_string(),
            ));
        }
        if self.control_plane.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "control_plane.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timing.log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "timing.log_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.control_plane.max_attempts, 3);
        assert_eq!(config.ssh.username, "broala");
        assert_eq!(config.timing.log_capacity, 20);
        assert_eq!(config.timing.seeding_poll, Duration::from_secs(15));
        assert_eq!(config.deploy.branch, "testing");
    }

    #[test]
    fn test_validate_requires_api_settings() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));

        config.control_plane.base_url = "https://api.example.test/sensors".to_string();
        assert!(config.validate().is_err());

        config.control_plane.api_key = "k".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[control_plane]\nbase_url = \"https://x\"\n\n[timing]\nseeding_poll = 30\n",
        )
        .unwrap();

        let config: Config = load_config(&path).unwrap();
        assert_eq!(config.control_plane.base_url, "https://x");
        assert_eq!(config.control_plane.request_timeout, Duration::from_secs(10));
        assert_eq!(config.timing.seeding_poll, Duration::from_secs(30));
        assert_eq!(config.timing.port_poll, Duration::from_secs(10));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.fleet.port = 9443;

        save_config(&path, &config).unwrap();
        let loaded: Config = load_config(&path).unwrap();
        assert_eq!(loaded.fleet.port, 9443);
    }

    #[test]
    fn test_missing_file() {
        let result: Result<Config, _> = load_config(Path::new("/nonexistent/sensorctl.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
