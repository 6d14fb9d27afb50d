//! Upgrade command implementation

use anyhow::Result;

use sensorctl_orchestrator::operation::UpgradeInfo;
use sensorctl_orchestrator::{Command, OrchestratorHandle};

use super::follow::follow_operation;
use super::{confirm, resolve_sensor};
use crate::output::{format_upgrade_info, print_error, print_info, print_success};

const INFO_FAILURE_PREFIX: &str = "Failed to load upgrade info";

/// Load upgrade information for `sensor` and wait for it to arrive.
///
/// Returns `None` when interrupted with Ctrl-C.
async fn load_info(handle: &OrchestratorHandle, sensor: &str) -> Result<Option<UpgradeInfo>> {
    let previous_error = handle.snapshot().error;

    print_info(&format!("Checking {} for updates...", sensor));
    if let Err(e) = handle
        .submit(Command::LoadUpgradeInfo {
            sensor: sensor.to_string(),
        })
        .await
    {
        print_error(&e.to_string());
        return Err(e.into());
    }

    let mut rx = handle.subscribe();
    let loaded = tokio::select! {
        loaded = rx.wait_for(|s| {
            s.upgrade_info.contains_key(sensor)
                || (s.error != previous_error
                    && s.error.as_deref().is_some_and(|e| e.starts_with(INFO_FAILURE_PREFIX)))
        }) => loaded.map(|s| match s.upgrade_info.get(sensor) {
            Some(info) => Ok(info.clone()),
            None => Err(s.error.clone().unwrap_or_default()),
        }),
        _ = tokio::signal::ctrl_c() => return Ok(None),
    };

    match loaded {
        Ok(Ok(info)) => Ok(Some(info)),
        Ok(Err(error)) => {
            print_error(&error);
            anyhow::bail!("Could not read upgrade information for {}", sensor)
        }
        Err(_) => anyhow::bail!("Orchestrator stopped while checking {}", sensor),
    }
}

/// Execute the upgrade command
///
/// Shows the installed version and available updates first; the upgrade
/// itself starts only after confirmation.
pub async fn upgrade_command(
    handle: &OrchestratorHandle,
    sensor: &str,
    version: Option<String>,
    yes: bool,
) -> Result<()> {
    let sensor = resolve_sensor(&handle.snapshot(), sensor)?;

    let Some(info) = load_info(handle, &sensor).await? else {
        return Ok(());
    };
    println!("{}", format_upgrade_info(&info));

    if version.is_none() && !info.has_updates() {
        print_success(&format!("{} is up to date", sensor));
        return Ok(());
    }

    let target = version.as_deref().unwrap_or("the latest available version");
    if !confirm(
        &format!(
            "About to upgrade {} from {} to {}.",
            sensor, info.current_version, target
        ),
        yes,
    )? {
        return Ok(());
    }

    let key = match handle.start(Command::StartUpgrade { sensor, version }).await {
        Ok(key) => key,
        Err(e) => {
            print_error(&e.to_string());
            return Err(e.into());
        }
    };

    follow_operation(handle, &key).await
}
