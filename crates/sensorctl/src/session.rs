//! In-process orchestrator session
//!
//! Loads configuration (file, then environment overrides), wires the HTTP
//! control plane and SSH gateway into an [`Orchestrator`], and runs its loop
//! on a background task for the lifetime of the command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensorctl_core::config::{self, Config};
use sensorctl_core::InventoryFile;
use sensorctl_orchestrator::{HttpControlPlane, Orchestrator, OrchestratorHandle, Services, SshGateway};

/// Settings that may come from the environment instead of the config file
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Control-plane base URL
    #[arg(long, global = true, env = "EC2_SENSOR_BASE_URL")]
    pub base_url: Option<String>,

    /// Control-plane API key
    #[arg(long, global = true, env = "EC2_SENSOR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// SSH login user on the sensors
    #[arg(long, global = true, env = "SSH_USERNAME")]
    pub ssh_user: Option<String>,

    /// SSH password, used when no key is available
    #[arg(long, global = true, env = "SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Inventory file of sensor names
    #[arg(long, global = true, env = "SENSORS_FILE")]
    pub sensors_file: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.base_url {
            config.control_plane.base_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.control_plane.api_key = key.clone();
        }
        if let Some(user) = &self.ssh_user {
            config.ssh.username = user.clone();
        }
        if let Some(password) = &self.ssh_password {
            config.ssh.password = Some(password.clone());
        }
        if let Some(path) = &self.sensors_file {
            config.inventory.path = path.clone();
        }
    }
}

/// Load the configuration file, falling back to defaults when the default
/// location has none, then layer the overrides on top.
pub fn load(config_path: Option<&PathBuf>, overrides: &Overrides) -> Result<Config> {
    let mut config: Config = match config_path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                config::load_config(&default_path)
                    .with_context(|| format!("Failed to load config from {:?}", default_path))?
            } else {
                tracing::debug!("No config file at {:?}, using defaults", default_path);
                Config::default()
            }
        }
    };

    overrides.apply(&mut config);
    Ok(config)
}

/// A running orchestrator owned by this process
pub struct Session {
    handle: OrchestratorHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    /// Validate `config`, start the loop and wait for the first inventory load
    pub async fn start(config: &Config) -> Result<Self> {
        config.validate().context("Incomplete configuration")?;

        let control_plane = HttpControlPlane::new(&config.control_plane)
            .context("Failed to build control-plane client")?;
        let remote = SshGateway::new(config.ssh.clone()).context("Failed to set up SSH")?;
        let inventory = InventoryFile::new(config.inventory.path.clone());

        let services = Services::new(Arc::new(control_plane), Arc::new(remote), inventory);
        let (orchestrator, handle) =
            Orchestrator::new(services, config.timing.clone(), config.fleet.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(orchestrator.run(cancel.clone()));

        let session = Self {
            handle,
            cancel,
            task,
        };
        if let Err(e) = session.wait_loaded().await {
            session.shutdown().await;
            return Err(e);
        }
        Ok(session)
    }

    pub fn handle(&self) -> &OrchestratorHandle {
        &self.handle
    }

    /// Wait for the first refresh; an unreadable inventory file ends the wait
    async fn wait_loaded(&self) -> Result<()> {
        let mut rx = self.handle.subscribe();
        let load_error = rx
            .wait_for(|s| s.loaded || s.load_error.is_some())
            .await
            .context("Orchestrator stopped before the inventory loaded")?
            .load_error
            .clone();
        match load_error {
            Some(error) => anyhow::bail!(error),
            None => Ok(()),
        }
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Orchestrator task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::default();
        config.control_plane.base_url = "https://file.example.test".to_string();

        let overrides = Overrides {
            base_url: Some("https://env.example.test".to_string()),
            ssh_password: Some("secret".to_string()),
            sensors_file: Some(PathBuf::from("/tmp/sensors")),
            ..Default::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.control_plane.base_url, "https://env.example.test");
        assert_eq!(config.ssh.password.as_deref(), Some("secret"));
        assert_eq!(config.inventory.path, PathBuf::from("/tmp/sensors"));
        assert_eq!(config.ssh.username, "broala");
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[fleet]\naddress = \"10.9.9.9\"\n").unwrap();

        let config = load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(config.fleet.address, "10.9.9.9");
        assert_eq!(config.fleet.port, 4443);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load(Some(&path), &Overrides::default()).is_err());
    }
}
