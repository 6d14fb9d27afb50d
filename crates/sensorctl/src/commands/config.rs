//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use sensorctl_core::config::{self, Config};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) -> Result<()> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}

/// Show the effective configuration with secrets masked
pub fn config_show(config: &Config, config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'sensorctl config init' to create one");
    }
    println!();

    let mut shown = config.clone();
    if !shown.control_plane.api_key.is_empty() {
        shown.control_plane.api_key = "********".to_string();
    }
    if shown.ssh.password.is_some() {
        shown.ssh.password = Some("********".to_string());
    }

    println!(
        "{}",
        toml::to_string_pretty(&shown).context("Failed to render configuration")?
    );
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &Config::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Set control_plane.base_url and control_plane.api_key, or export EC2_SENSOR_BASE_URL and EC2_SENSOR_API_KEY");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        let loaded: Config = config::load_config(&path).unwrap();
        assert_eq!(loaded.fleet.port, 4443);
        assert_eq!(loaded.timing.log_capacity, 20);
    }

    #[test]
    fn test_init_keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[fleet]\nport = 9\n").unwrap();

        config_init(Some(&path), false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[fleet]\nport = 9\n");

        config_init(Some(&path), true).unwrap();
        let loaded: Config = config::load_config(&path).unwrap();
        assert_eq!(loaded.fleet.port, 4443);
    }
}
