//! Delete command implementation

use anyhow::Result;

use sensorctl_orchestrator::OrchestratorHandle;

use super::follow::follow_operation;
use super::{confirm, resolve_sensor};
use crate::output::print_error;

/// Execute the delete command
pub async fn delete_command(handle: &OrchestratorHandle, sensor: &str, yes: bool) -> Result<()> {
    let sensor = resolve_sensor(&handle.snapshot(), sensor)?;

    if !confirm(&format!("About to delete sensor {}.", sensor), yes)? {
        return Ok(());
    }

    let key = match handle.delete(&sensor).await {
        Ok(key) => key,
        Err(e) => {
            print_error(&format!("Failed to delete {}: {}", sensor, e));
            return Err(e.into());
        }
    };

    follow_operation(handle, &key).await
}
