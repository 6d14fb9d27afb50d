//! Deployment phase machine
//!
//! `Requested → ApiPending → SshPortWait → SshServiceWait → Seeding → Ready`,
//! each phase entered only from its predecessor. A probe result for the
//! current phase either advances it or reschedules the same probe after the
//! phase's poll interval. Probe errors are logged and retried like `Pending`:
//! a provisioning sensor is expected to be unreachable for a while. Only a
//! failed create ends a deployment early.

use std::time::Duration;

use serde::Serialize;

use sensorctl_core::config::TimingConfig;
use sensorctl_core::time::format_elapsed;
use sensorctl_core::types::short_id;

use super::{OperationDetail, OperationState, Phase};
use crate::control_plane::CreateRequest;
use crate::error::OperationError;
use crate::probe::ProbeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Requested,
    ApiPending,
    SshPortWait,
    SshServiceWait,
    Seeding,
    Ready,
    Failed,
}

impl DeployPhase {
    /// Delay before re-probing a phase that is not satisfied yet
    pub fn poll_interval(self, timing: &TimingConfig) -> Duration {
        match self {
            DeployPhase::ApiPending => timing.api_poll,
            DeployPhase::SshPortWait => timing.port_poll,
            DeployPhase::SshServiceWait => timing.service_poll,
            DeployPhase::Seeding => timing.seeding_poll,
            _ => Duration::ZERO,
        }
    }

    /// Short status line for presentation
    pub fn label(self) -> &'static str {
        match self {
            DeployPhase::Requested => "Creating sensor",
            DeployPhase::ApiPending => "Waiting for API",
            DeployPhase::SshPortWait => "Phase 1/3: SSH port",
            DeployPhase::SshServiceWait => "Phase 2/3: SSH service",
            DeployPhase::Seeding => "Phase 3/3: Seeding",
            DeployPhase::Ready => "Ready",
            DeployPhase::Failed => "Failed",
        }
    }

    fn waiting_message(self) -> &'static str {
        match self {
            DeployPhase::SshPortWait => "[Phase 1/3] Waiting for SSH port...",
            DeployPhase::SshServiceWait => "[Phase 2/3] Waiting for SSH service...",
            DeployPhase::Seeding => "[Phase 3/3] Waiting for sensor seeding (system.seeded=1)...",
            _ => "Waiting for sensor to be ready (~20 minutes)...",
        }
    }
}

/// Deployment-specific data
#[derive(Debug, Clone, Default)]
pub struct Deployment {
    pub request: Option<CreateRequest>,
    /// Name assigned by the control plane
    pub sensor: Option<String>,
    /// Address once the API reports one
    pub address: Option<String>,
}

impl Deployment {
    pub fn new(request: CreateRequest) -> Self {
        Self {
            request: Some(request),
            ..Default::default()
        }
    }
}

/// A probe result tagged with the phase it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployProbe {
    Inventory(ProbeResult<String>),
    Port(ProbeResult<()>),
    Service(ProbeResult<()>),
    Seeded(ProbeResult<()>),
}

impl DeployProbe {
    pub fn phase(&self) -> DeployPhase {
        match self {
            DeployProbe::Inventory(_) => DeployPhase::ApiPending,
            DeployProbe::Port(_) => DeployPhase::SshPortWait,
            DeployProbe::Service(_) => DeployPhase::SshServiceWait,
            DeployProbe::Seeded(_) => DeployPhase::Seeding,
        }
    }
}

/// Next asynchronous action a deployment needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStep {
    Create(CreateRequest),
    FetchInventory { sensor: String },
    ProbePort { host: String },
    ProbeService { host: String },
    ProbeSeeded { host: String },
}

/// Effect of applying a result to a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployProgress {
    /// Same phase, probe rescheduled
    Waiting,
    Advanced(DeployPhase),
    /// Seeding finished; the caller emits the completion message
    Ready { sensor: String, address: String },
    /// Result for a phase the deployment already left
    Stale,
    Failed,
}

fn current_phase(op: &OperationState) -> Result<DeployPhase, OperationError> {
    match op.phase() {
        Phase::Deploy(phase) => Ok(phase),
        other => Err(OperationError::PhaseRegression {
            from: other.to_string(),
            to: "deploy".to_string(),
        }),
    }
}

fn deployment_mut(op: &mut OperationState) -> Option<&mut Deployment> {
    match &mut op.detail {
        OperationDetail::Deploy(deployment) => Some(deployment),
        _ => None,
    }
}

/// The action the current phase is waiting on, if any
pub fn next_step(op: &OperationState) -> Option<DeployStep> {
    let deployment = match op.detail() {
        OperationDetail::Deploy(deployment) => deployment,
        _ => return None,
    };
    let host = || deployment.address.clone();

    match op.phase() {
        Phase::Deploy(DeployPhase::Requested) => deployment.request.clone().map(DeployStep::Create),
        Phase::Deploy(DeployPhase::ApiPending) => deployment
            .sensor
            .clone()
            .map(|sensor| DeployStep::FetchInventory { sensor }),
        Phase::Deploy(DeployPhase::SshPortWait) => host().map(|host| DeployStep::ProbePort { host }),
        Phase::Deploy(DeployPhase::SshServiceWait) => {
            host().map(|host| DeployStep::ProbeService { host })
        }
        Phase::Deploy(DeployPhase::Seeding) => host().map(|host| DeployStep::ProbeSeeded { host }),
        _ => None,
    }
}

/// Enter `to`, log it and dispatch its probe right away
fn enter(op: &mut OperationState, to: DeployPhase) -> Result<DeployProgress, OperationError> {
    op.advance_to(Phase::Deploy(to))?;
    tracing::info!("{}: {}", op.key(), to.label());
    op.push_log(to.waiting_message());
    op.schedule(tokio::time::Instant::now());
    Ok(DeployProgress::Advanced(to))
}

/// Apply the result of the create call
pub fn apply_created(
    op: &mut OperationState,
    result: Result<String, String>,
) -> Result<DeployProgress, OperationError> {
    if current_phase(op)? != DeployPhase::Requested {
        return Ok(DeployProgress::Stale);
    }

    match result {
        Ok(name) => {
            op.push_log(format!("✓ Sensor created: {}", short_id(&name)));
            if let Some(deployment) = deployment_mut(op) {
                deployment.sensor = Some(name);
            }
            enter(op, DeployPhase::ApiPending)
        }
        Err(e) => {
            op.fail(format!("Failed to create sensor: {}", e));
            Ok(DeployProgress::Failed)
        }
    }
}

/// Apply a probe result for the current phase
pub fn apply_probe(
    op: &mut OperationState,
    probe: DeployProbe,
    timing: &TimingConfig,
) -> Result<DeployProgress, OperationError> {
    let phase = current_phase(op)?;
    if probe.phase() != phase || !op.is_active() {
        tracing::debug!("{}: ignoring {:?} result while in {:?}", op.key(), probe.phase(), phase);
        return Ok(DeployProgress::Stale);
    }

    let phase_time = format_elapsed(op.phase_elapsed());
    match probe {
        DeployProbe::Inventory(ProbeResult::Satisfied(address)) => {
            op.push_log(format!("API Status: running ({})", address));
            if let Some(deployment) = deployment_mut(op) {
                deployment.address = Some(address);
            }
            enter(op, DeployPhase::SshPortWait)
        }
        DeployProbe::Port(ProbeResult::Satisfied(())) => {
            op.push_log(format!("[Phase 1/3] ✓ SSH port accessible ({})", phase_time));
            enter(op, DeployPhase::SshServiceWait)
        }
        DeployProbe::Service(ProbeResult::Satisfied(())) => {
            op.push_log(format!("[Phase 2/3] ✓ SSH service ready ({})", phase_time));
            op.push_log("This can take 60+ minutes for initial seeding...");
            enter(op, DeployPhase::Seeding)
        }
        DeployProbe::Seeded(ProbeResult::Satisfied(())) => {
            op.push_log(format!("[Phase 3/3] ✓ Seeding complete! ({})", phase_time));
            op.advance_to(Phase::Deploy(DeployPhase::Ready))?;
            op.mark_dispatched();

            let (sensor, address) = match op.detail() {
                OperationDetail::Deploy(d) => (
                    d.sensor.clone().unwrap_or_default(),
                    d.address.clone().unwrap_or_default(),
                ),
                _ => (String::new(), String::new()),
            };
            Ok(DeployProgress::Ready { sensor, address })
        }
        DeployProbe::Inventory(ProbeResult::Pending(detail)) => {
            op.push_log(format!("API Status: {}", detail));
            op.schedule_in(phase.poll_interval(timing));
            Ok(DeployProgress::Waiting)
        }
        DeployProbe::Port(ProbeResult::Pending(detail))
        | DeployProbe::Service(ProbeResult::Pending(detail))
        | DeployProbe::Seeded(ProbeResult::Pending(detail)) => {
            let message = match phase {
                DeployPhase::Seeding => format!("[Phase 3/3] Seeding in progress ({})", detail),
                other => format!("{} ({})", other.waiting_message(), detail),
            };
            op.push_log(message);
            op.schedule_in(phase.poll_interval(timing));
            Ok(DeployProgress::Waiting)
        }
        DeployProbe::Inventory(ProbeResult::Error(failure))
        | DeployProbe::Port(ProbeResult::Error(failure))
        | DeployProbe::Service(ProbeResult::Error(failure))
        | DeployProbe::Seeded(ProbeResult::Error(failure)) => {
            tracing::warn!("{}: probe error in {:?}: {}", op.key(), phase, failure);
            op.push_log(format!("⚠ {}", failure));
            op.schedule_in(phase.poll_interval(timing));
            Ok(DeployProgress::Waiting)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCategory;
    use crate::operation::OperationKey;
    use crate::probe::ProbeFailure;

    fn new_deploy() -> OperationState {
        let request = CreateRequest {
            development_branch: "testing".into(),
            team_name: "cicd".into(),
            username: "alice".into(),
        };
        OperationState::new(
            OperationKey::deploy(),
            Phase::Deploy(DeployPhase::Requested),
            OperationDetail::Deploy(Deployment::new(request)),
            20,
        )
    }

    fn phase_of(op: &OperationState) -> DeployPhase {
        match op.phase() {
            Phase::Deploy(p) => p,
            other => panic!("not a deploy phase: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_dispatches_create() {
        let op = new_deploy();
        assert!(matches!(next_step(&op), Some(DeployStep::Create(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_is_fatal() {
        let mut op = new_deploy();
        let progress = apply_created(&mut op, Err("HTTP 500".into())).unwrap();
        assert_eq!(progress, DeployProgress::Failed);
        assert_eq!(phase_of(&op), DeployPhase::Failed);
        assert!(!op.is_active());
        assert!(op.last_error().unwrap().contains("HTTP 500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_pending_until_running_with_address() {
        let timing = TimingConfig::default();
        let mut op = new_deploy();
        apply_created(&mut op, Ok("ec2-sensor-1700000000".into())).unwrap();
        assert_eq!(
            next_step(&op),
            Some(DeployStep::FetchInventory {
                sensor: "ec2-sensor-1700000000".into()
            })
        );

        for _ in 0..10 {
            let progress = apply_probe(
                &mut op,
                DeployProbe::Inventory(ProbeResult::Pending("status pending, address not assigned".into())),
                &timing,
            )
            .unwrap();
            assert_eq!(progress, DeployProgress::Waiting);
            assert_eq!(phase_of(&op), DeployPhase::ApiPending);
        }

        apply_probe(
            &mut op,
            DeployProbe::Inventory(ProbeResult::Satisfied("10.0.0.42".into())),
            &timing,
        )
        .unwrap();
        assert_eq!(phase_of(&op), DeployPhase::SshPortWait);
        assert_eq!(
            next_step(&op),
            Some(DeployStep::ProbePort {
                host: "10.0.0.42".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeding_waits_then_ready() {
        let timing = TimingConfig::default();
        let mut op = new_deploy();
        apply_created(&mut op, Ok("ec2-sensor-1".into())).unwrap();
        apply_probe(&mut op, DeployProbe::Inventory(ProbeResult::Satisfied("10.0.0.9".into())), &timing).unwrap();
        apply_probe(&mut op, DeployProbe::Port(ProbeResult::Satisfied(())), &timing).unwrap();
        apply_probe(&mut op, DeployProbe::Service(ProbeResult::Satisfied(())), &timing).unwrap();
        assert_eq!(phase_of(&op), DeployPhase::Seeding);

        for _ in 0..50 {
            apply_probe(
                &mut op,
                DeployProbe::Seeded(ProbeResult::Pending("system.seeded=0".into())),
                &timing,
            )
            .unwrap();
            assert_eq!(phase_of(&op), DeployPhase::Seeding);
        }
        assert_eq!(op.log().len(), 20);

        let progress =
            apply_probe(&mut op, DeployProbe::Seeded(ProbeResult::Satisfied(())), &timing).unwrap();
        assert_eq!(
            progress,
            DeployProgress::Ready {
                sensor: "ec2-sensor-1".into(),
                address: "10.0.0.9".into()
            }
        );
        assert_eq!(phase_of(&op), DeployPhase::Ready);
        assert!(next_step(&op).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_is_retried_not_fatal() {
        let timing = TimingConfig::default();
        let mut op = new_deploy();
        apply_created(&mut op, Ok("ec2-sensor-1".into())).unwrap();
        apply_probe(&mut op, DeployProbe::Inventory(ProbeResult::Satisfied("10.0.0.9".into())), &timing).unwrap();
        apply_probe(&mut op, DeployProbe::Port(ProbeResult::Satisfied(())), &timing).unwrap();

        let failure = ProbeFailure {
            category: FailureCategory::ConnectionRefused,
            detail: "connection refused".into(),
        };
        let progress = apply_probe(
            &mut op,
            DeployProbe::Service(ProbeResult::Error(failure)),
            &timing,
        )
        .unwrap();

        assert_eq!(progress, DeployProgress::Waiting);
        assert_eq!(phase_of(&op), DeployPhase::SshServiceWait);
        assert!(op.is_active());
        assert!(!op.is_due(tokio::time::Instant::now()));
        tokio::time::advance(timing.service_poll).await;
        assert!(op.is_due(tokio::time::Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_results_ignored() {
        let timing = TimingConfig::default();
        let mut op = new_deploy();
        apply_created(&mut op, Ok("ec2-sensor-1".into())).unwrap();
        apply_probe(&mut op, DeployProbe::Inventory(ProbeResult::Satisfied("10.0.0.9".into())), &timing).unwrap();

        let progress = apply_probe(
            &mut op,
            DeployProbe::Inventory(ProbeResult::Pending("late".into())),
            &timing,
        )
        .unwrap();
        assert_eq!(progress, DeployProgress::Stale);
        assert_eq!(phase_of(&op), DeployPhase::SshPortWait);

        assert_eq!(
            apply_created(&mut op, Ok("other".into())).unwrap(),
            DeployProgress::Stale
        );
    }

    #[test]
    fn test_phase_order() {
        let happy_path = [
            DeployPhase::Requested,
            DeployPhase::ApiPending,
            DeployPhase::SshPortWait,
            DeployPhase::SshServiceWait,
            DeployPhase::Seeding,
            DeployPhase::Ready,
        ];
        assert!(happy_path.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
