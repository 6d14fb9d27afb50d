//! Traffic generator command implementation

use anyhow::Result;

use sensorctl_orchestrator::operation::TrafficAction;
use sensorctl_orchestrator::{Command, OrchestratorHandle};

use super::follow::follow_operation;
use super::resolve_sensor;
use crate::output::print_error;

/// Execute the traffic command
pub async fn traffic_command(
    handle: &OrchestratorHandle,
    sensor: &str,
    action: TrafficAction,
) -> Result<()> {
    let sensor = resolve_sensor(&handle.snapshot(), sensor)?;

    let key = match handle
        .start(Command::ConfigureTraffic { sensor, action })
        .await
    {
        Ok(key) => key,
        Err(e) => {
            print_error(&e.to_string());
            return Err(e.into());
        }
    };

    follow_operation(handle, &key).await
}
