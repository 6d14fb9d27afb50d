//! Deploy command implementation

use anyhow::Result;

use sensorctl_orchestrator::control_plane::CreateRequest;
use sensorctl_orchestrator::operation::{DeployPhase, Phase};
use sensorctl_orchestrator::snapshot::OperationView;
use sensorctl_orchestrator::OrchestratorHandle;

use super::follow::{follow_operation, follow_until};
use crate::output::{print_error, print_info, print_success};

/// Execute the deploy command
///
/// With `detach` the command returns once the control plane has accepted
/// the sensor; provisioning carries on remotely and `sensorctl list` shows
/// it from then on.
pub async fn deploy_command(
    handle: &OrchestratorHandle,
    request: CreateRequest,
    detach: bool,
) -> Result<()> {
    print_info(&format!(
        "Deploying sensor from branch {} for team {}",
        request.development_branch, request.team_name
    ));

    let key = match handle.deploy(request).await {
        Ok(key) => key,
        Err(e) => {
            print_error(&format!("Failed to start deployment: {}", e));
            return Err(e.into());
        }
    };

    if !detach {
        return follow_operation(handle, &key).await;
    }

    let created = |view: &OperationView| {
        view.phase.rank() > Phase::Deploy(DeployPhase::Requested).rank()
    };
    let Some(view) = follow_until(handle, &key, created).await? else {
        return Ok(());
    };

    if view.phase.is_failed() {
        let error = view.last_error.unwrap_or_default();
        print_error(&format!("Deployment failed: {}", error));
        anyhow::bail!("Deployment failed");
    }

    print_success("Sensor created; provisioning continues in the background");
    print_info("Run 'sensorctl list' to check on it");
    Ok(())
}
