//! Status command implementation

use anyhow::Result;

use sensorctl_orchestrator::OrchestratorHandle;

use crate::output::{format_operations, format_status};

/// Execute the status command
pub async fn status_command(handle: &OrchestratorHandle) -> Result<()> {
    let snapshot = handle.snapshot();

    print!("{}", format_status(&snapshot));
    if !snapshot.operations.is_empty() {
        println!();
        println!("{}", format_operations(&snapshot.operations));
    }

    Ok(())
}
