//! List command implementation

use anyhow::Result;

use sensorctl_orchestrator::OrchestratorHandle;

use crate::output::{format_sensors, print_warning};

/// Execute the list command
pub async fn list_command(handle: &OrchestratorHandle, long: bool, json: bool) -> Result<()> {
    let snapshot = handle.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.sensors)?);
        return Ok(());
    }

    if snapshot.api_online == Some(false) {
        print_warning("Control-plane API is unreachable; showing what could be fetched");
    }

    println!("{}", format_sensors(&snapshot.sensors, long));

    Ok(())
}
