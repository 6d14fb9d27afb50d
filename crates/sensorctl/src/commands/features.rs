//! Feature-enable and fleet-registration commands

use anyhow::Result;

use sensorctl_orchestrator::{Command, OrchestratorHandle};

use super::follow::follow_operation;
use super::{confirm, resolve_sensor};
use crate::output::print_error;

/// Run one configuration action against a sensor after confirmation
async fn run_action(
    handle: &OrchestratorHandle,
    prompt: String,
    yes: bool,
    command: Command,
) -> Result<()> {
    if !confirm(&prompt, yes)? {
        return Ok(());
    }

    let key = match handle.start(command).await {
        Ok(key) => key,
        Err(e) => {
            print_error(&e.to_string());
            return Err(e.into());
        }
    };

    follow_operation(handle, &key).await
}

/// Execute the enable-features command
pub async fn enable_features_command(
    handle: &OrchestratorHandle,
    sensor: &str,
    yes: bool,
) -> Result<()> {
    let sensor = resolve_sensor(&handle.snapshot(), sensor)?;
    run_action(
        handle,
        format!("About to enable sensor features on {}.", sensor),
        yes,
        Command::EnableFeatures { sensor },
    )
    .await
}

/// Execute the add-to-fleet command
pub async fn add_to_fleet_command(
    handle: &OrchestratorHandle,
    sensor: &str,
    yes: bool,
) -> Result<()> {
    let sensor = resolve_sensor(&handle.snapshot(), sensor)?;
    run_action(
        handle,
        format!("About to register {} with the fleet manager.", sensor),
        yes,
        Command::AddToFleet { sensor },
    )
    .await
}
