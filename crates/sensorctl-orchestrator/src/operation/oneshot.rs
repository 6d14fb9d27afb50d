//! One-shot operations: feature enablement, fleet registration, traffic
//! generation and deletion
//!
//! Each issues a single action and waits for one result. Actions that only
//! make sense on a configured sensor are gated by a precondition probe; a
//! sensor that fails the gate is rejected with a diagnostic instead of being
//! handed a command that would fail opaquely.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Serialize;

use super::{OperationDetail, OperationKind, OperationState, Phase};
use crate::error::OperationError;
use crate::probe::ProbeResult;
use crate::remote::scripts::{self, FeatureOutcome};

/// Trailing output lines kept in the log when an action fails
const FAILURE_TAIL_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OneShotPhase {
    Precondition,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficProtocol {
    Udp,
    Tcp,
}

impl FromStr for TrafficProtocol {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(TrafficProtocol::Udp),
            "tcp" => Ok(TrafficProtocol::Tcp),
            other => Err(OperationError::InvalidTraffic(format!(
                "protocol must be udp or tcp, got {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for TrafficProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficProtocol::Udp => f.write_str("udp"),
            TrafficProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Parameters for starting traffic generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficSpec {
    pub target: IpAddr,
    pub port: u16,
    pub protocol: TrafficProtocol,
    /// Packets per second
    pub rate: u32,
    /// Zero runs until stopped
    pub duration_secs: u32,
}

impl TrafficSpec {
    /// Defaults aimed at `target`: udp/5555 at 1000 pps, continuous
    pub fn to(target: &str) -> Result<Self, OperationError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(OperationError::InvalidTraffic("target IP is required".to_string()));
        }
        let target = target
            .parse::<IpAddr>()
            .map_err(|_| OperationError::InvalidTraffic(format!("invalid target IP {:?}", target)))?;
        Ok(Self {
            target,
            port: 5555,
            protocol: TrafficProtocol::Udp,
            rate: 1000,
            duration_secs: 0,
        })
    }

    pub fn validate(&self) -> Result<(), OperationError> {
        if self.port == 0 {
            return Err(OperationError::InvalidTraffic("port must be non-zero".to_string()));
        }
        if self.rate == 0 {
            return Err(OperationError::InvalidTraffic("rate must be at least 1 pps".to_string()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let duration = if self.duration_secs == 0 {
            "continuous".to_string()
        } else {
            format!("{}s", self.duration_secs)
        };
        format!(
            "{} traffic to {}:{} at {} pps ({})",
            self.protocol.to_string().to_uppercase(),
            self.target,
            self.port,
            self.rate,
            duration
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficAction {
    Install,
    Start(TrafficSpec),
    Stop,
    Status,
}

/// Gate checked before a one-shot action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// Seeding finished (`system.seeded=1`)
    Seeded,
    /// SSH answers
    ServiceReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OneShotAction {
    EnableFeatures,
    AddToFleet { address: String, port: u16 },
    Traffic(TrafficAction),
    Delete,
}

impl OneShotAction {
    pub fn kind(&self) -> OperationKind {
        match self {
            OneShotAction::EnableFeatures => OperationKind::EnableFeatures,
            OneShotAction::AddToFleet { .. } => OperationKind::AddToFleet,
            OneShotAction::Traffic(_) => OperationKind::ConfigureTraffic,
            OneShotAction::Delete => OperationKind::Delete,
        }
    }

    pub fn precondition(&self) -> Precondition {
        match self {
            OneShotAction::EnableFeatures | OneShotAction::AddToFleet { .. } => Precondition::Seeded,
            OneShotAction::Traffic(_) => Precondition::ServiceReady,
            OneShotAction::Delete => Precondition::None,
        }
    }

    /// Whether the action needs the sensor's address
    pub fn needs_host(&self) -> bool {
        !matches!(self, OneShotAction::Delete)
    }

    /// Remote command, or `None` for control-plane actions
    pub fn command(&self) -> Option<String> {
        match self {
            OneShotAction::EnableFeatures => Some(scripts::ENABLE_FEATURES.to_string()),
            OneShotAction::AddToFleet { address, port } => {
                Some(scripts::fleet_registration(address, *port))
            }
            OneShotAction::Traffic(TrafficAction::Install) => Some(scripts::TRAFFIC_INSTALL.to_string()),
            OneShotAction::Traffic(TrafficAction::Start(spec)) => Some(scripts::traffic_start(
                &spec.target.to_string(),
                spec.port,
                &spec.protocol.to_string(),
                spec.rate,
                spec.duration_secs,
            )),
            OneShotAction::Traffic(TrafficAction::Stop) => Some(scripts::TRAFFIC_STOP.to_string()),
            OneShotAction::Traffic(TrafficAction::Status) => Some(scripts::TRAFFIC_STATUS.to_string()),
            OneShotAction::Delete => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            OneShotAction::EnableFeatures => "Enabling sensor features".to_string(),
            OneShotAction::AddToFleet { address, port } => {
                format!("Adding sensor to fleet manager {}:{}", address, port)
            }
            OneShotAction::Traffic(TrafficAction::Install) => "Installing traffic generator".to_string(),
            OneShotAction::Traffic(TrafficAction::Start(spec)) => format!("Starting {}", spec.describe()),
            OneShotAction::Traffic(TrafficAction::Stop) => "Stopping traffic generation".to_string(),
            OneShotAction::Traffic(TrafficAction::Status) => "Checking traffic generator".to_string(),
            OneShotAction::Delete => "Deleting sensor".to_string(),
        }
    }

    /// Decide success from the action's output by its markers
    pub fn interpret(&self, output: &str) -> Result<String, String> {
        match self {
            OneShotAction::EnableFeatures => {
                let outcome = FeatureOutcome::from_output(output);
                if outcome.is_success() {
                    Ok(outcome.message().to_string())
                } else {
                    Err(outcome.message().to_string())
                }
            }
            OneShotAction::AddToFleet { address, port } => {
                if scripts::fleet_succeeded(output) {
                    Ok(format!("Sensor added to fleet manager at {}:{}", address, port))
                } else {
                    Err("Fleet manager configuration failed".to_string())
                }
            }
            OneShotAction::Traffic(TrafficAction::Install) => {
                Ok("Traffic generator installed at /tmp/simple_traffic_generator.py".to_string())
            }
            OneShotAction::Traffic(TrafficAction::Start(spec)) => {
                Ok(format!("Traffic generation started: {}", spec.describe()))
            }
            OneShotAction::Traffic(TrafficAction::Stop) => Ok("Traffic generation stopped".to_string()),
            OneShotAction::Traffic(TrafficAction::Status) => match output.trim() {
                "" => Ok("Traffic generator not running".to_string()),
                line => Ok(format!("Traffic generator running: {}", line)),
            },
            OneShotAction::Delete => Ok("Sensor deleted".to_string()),
        }
    }
}

/// One-shot operation data
#[derive(Debug, Clone)]
pub struct OneShot {
    pub action: OneShotAction,
    pub sensor: String,
    pub host: Option<String>,
    /// Raw output of the action, once it ran
    pub output: Option<String>,
}

impl OneShot {
    pub fn new(action: OneShotAction, sensor: impl Into<String>, host: Option<String>) -> Self {
        Self {
            action,
            sensor: sensor.into(),
            host,
            output: None,
        }
    }

    /// Phase a new operation starts in
    pub fn initial_phase(&self) -> OneShotPhase {
        match self.action.precondition() {
            Precondition::None => OneShotPhase::Running,
            _ => OneShotPhase::Precondition,
        }
    }
}

/// Next asynchronous action a one-shot operation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneShotStep {
    CheckPrecondition { host: String, precondition: Precondition },
    RunCommand { host: String, command: String },
    DeleteSensor { sensor: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneShotProgress {
    Started,
    Rejected,
    Succeeded,
    Failed,
    Stale,
}

fn oneshot(op: &OperationState) -> Option<&OneShot> {
    match op.detail() {
        OperationDetail::OneShot(o) => Some(o),
        _ => None,
    }
}

pub fn next_step(op: &OperationState) -> Option<OneShotStep> {
    let o = oneshot(op)?;
    match op.phase() {
        Phase::OneShot(OneShotPhase::Precondition) => Some(OneShotStep::CheckPrecondition {
            host: o.host.clone()?,
            precondition: o.action.precondition(),
        }),
        Phase::OneShot(OneShotPhase::Running) => match o.action.command() {
            Some(command) => Some(OneShotStep::RunCommand {
                host: o.host.clone()?,
                command,
            }),
            None => Some(OneShotStep::DeleteSensor {
                sensor: o.sensor.clone(),
            }),
        },
        _ => None,
    }
}

/// Apply the gate's verdict
pub fn apply_precondition(
    op: &mut OperationState,
    result: ProbeResult<()>,
) -> Result<OneShotProgress, OperationError> {
    if op.phase() != Phase::OneShot(OneShotPhase::Precondition) {
        return Ok(OneShotProgress::Stale);
    }
    let (describe, host) = match oneshot(op) {
        Some(o) => (o.action.describe(), o.host.clone().unwrap_or_default()),
        None => return Ok(OneShotProgress::Stale),
    };

    match result {
        ProbeResult::Satisfied(()) => {
            op.advance_to(Phase::OneShot(OneShotPhase::Running))?;
            op.push_log(format!("{}...", describe));
            op.schedule(tokio::time::Instant::now());
            Ok(OneShotProgress::Started)
        }
        ProbeResult::Pending(observed) => {
            op.push_log(format!("Target: {}", host));
            op.push_log(format!("{} (expecting system.seeded=1)", observed));
            if observed.ends_with("=0") {
                op.push_log("Sensor is still seeding; this can take 60+ minutes for new sensors");
            }
            op.fail(format!("Sensor not ready - not yet seeded ({})", observed));
            Ok(OneShotProgress::Rejected)
        }
        ProbeResult::Error(failure) => {
            op.push_log(format!("Target: {}", host));
            op.push_log(format!("Error type: {}", failure.category));
            op.push_log(format!("Details: {}", failure.detail));
            op.push_log("Troubleshooting:");
            for hint in failure.category.hints() {
                op.push_log(format!("  - {}", hint));
            }
            op.fail(format!("Cannot check sensor status: {}", failure.category));
            Ok(OneShotProgress::Rejected)
        }
    }
}

/// Why an action did not produce output to interpret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub error: String,
    /// Output captured before the failure, if any
    pub output: Option<String>,
}

impl ActionFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            output: None,
        }
    }
}

fn log_tail(op: &mut OperationState, output: &str) {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    for line in &lines[start..] {
        op.push_log(format!("  {}", line.trim_end()));
    }
}

/// Apply the action's result: its output if it ran, the failure if not
pub fn apply_outcome(
    op: &mut OperationState,
    result: Result<String, ActionFailure>,
) -> Result<OneShotProgress, OperationError> {
    if op.phase() != Phase::OneShot(OneShotPhase::Running) || !op.is_active() {
        return Ok(OneShotProgress::Stale);
    }
    let action = match &mut op.detail {
        OperationDetail::OneShot(o) => {
            o.output = match &result {
                Ok(output) => Some(output.clone()),
                Err(failure) => failure.output.clone(),
            };
            o.action.clone()
        }
        _ => return Ok(OneShotProgress::Stale),
    };

    let (verdict, output) = match result {
        Ok(output) => (action.interpret(&output), Some(output)),
        Err(failure) => (Err(failure.error), failure.output),
    };

    match verdict {
        Ok(message) => {
            op.advance_to(Phase::OneShot(OneShotPhase::Succeeded))?;
            tracing::info!("{}: {}", op.key(), message);
            op.complete(format!("✓ {}", message));
            Ok(OneShotProgress::Succeeded)
        }
        Err(message) => {
            if let Some(output) = output {
                log_tail(op, &output);
            }
            op.fail(message);
            Ok(OneShotProgress::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCategory;
    use crate::operation::OperationKey;
    use crate::probe::ProbeFailure;

    fn state(action: OneShotAction) -> OperationState {
        let kind = action.kind();
        let o = OneShot::new(action, "ec2-sensor-1", Some("10.0.0.9".into()));
        let phase = Phase::OneShot(o.initial_phase());
        OperationState::new(
            OperationKey::new("ec2-sensor-1", kind),
            phase,
            OperationDetail::OneShot(o),
            20,
        )
    }

    #[test]
    fn test_traffic_spec() {
        let spec = TrafficSpec::to("10.0.0.5").unwrap();
        assert_eq!(spec.port, 5555);
        assert_eq!(spec.protocol, TrafficProtocol::Udp);
        assert_eq!(spec.rate, 1000);
        assert_eq!(spec.duration_secs, 0);

        assert!(TrafficSpec::to("").is_err());
        assert!(TrafficSpec::to("10.0.0.5; rm -rf /").is_err());
        assert_eq!("TCP".parse::<TrafficProtocol>().unwrap(), TrafficProtocol::Tcp);
        assert!("icmp".parse::<TrafficProtocol>().is_err());

        let bad = TrafficSpec { rate: 0, ..spec };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_preconditions() {
        assert_eq!(OneShotAction::EnableFeatures.precondition(), Precondition::Seeded);
        assert_eq!(
            OneShotAction::Traffic(TrafficAction::Stop).precondition(),
            Precondition::ServiceReady
        );
        assert_eq!(OneShotAction::Delete.precondition(), Precondition::None);
        assert_eq!(
            OneShot::new(OneShotAction::Delete, "s", None).initial_phase(),
            OneShotPhase::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_rejects_with_category() {
        let mut op = state(OneShotAction::EnableFeatures);
        assert!(matches!(
            next_step(&op),
            Some(OneShotStep::CheckPrecondition { .. })
        ));

        let progress = apply_precondition(
            &mut op,
            ProbeResult::Error(ProbeFailure {
                category: FailureCategory::AuthFailure,
                detail: "authentication rejected by 10.0.0.9 for user broala".into(),
            }),
        )
        .unwrap();

        assert_eq!(progress, OneShotProgress::Rejected);
        assert_eq!(op.phase(), Phase::OneShot(OneShotPhase::Failed));
        assert!(op.last_error().unwrap().contains("auth failed"));
        let log: Vec<String> = op.log().iter().map(|e| e.message.clone()).collect();
        assert!(log.iter().any(|l| l.contains("Check SSH keys are configured")));
        assert!(next_step(&op).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_seeded_rejects_distinctly() {
        let mut op = state(OneShotAction::AddToFleet {
            address: "192.168.22.239".into(),
            port: 4443,
        });
        apply_precondition(&mut op, ProbeResult::Pending("system.seeded=0".into())).unwrap();
        let error = op.last_error().unwrap();
        assert!(error.contains("not yet seeded"));
        assert!(!error.contains("Cannot check"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_features_outcomes() {
        let mut op = state(OneShotAction::EnableFeatures);
        apply_precondition(&mut op, ProbeResult::Satisfied(())).unwrap();
        assert!(matches!(next_step(&op), Some(OneShotStep::RunCommand { .. })));

        apply_outcome(
            &mut op,
            Ok("=== CONFIG_SET_OK ===\n=== APPLY_CONFIG_OK ===\n".into()),
        )
        .unwrap();
        assert_eq!(op.phase(), Phase::OneShot(OneShotPhase::Succeeded));
        assert!(!op.is_active());

        let mut partial = state(OneShotAction::EnableFeatures);
        apply_precondition(&mut partial, ProbeResult::Satisfied(())).unwrap();
        let progress = apply_outcome(
            &mut partial,
            Ok("=== CONFIG_SET_OK ===\nbroala-apply-config: timeout\n=== APPLY_CONFIG_FAILED ===".into()),
        )
        .unwrap();
        assert_eq!(progress, OneShotProgress::Failed);
        assert_eq!(
            partial.last_error(),
            Some("Features configured but apply-config failed")
        );
        assert!(partial
            .log()
            .iter()
            .any(|e| e.message.contains("broala-apply-config: timeout")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_skips_precondition() {
        let mut op = state(OneShotAction::Delete);
        assert_eq!(
            next_step(&op),
            Some(OneShotStep::DeleteSensor {
                sensor: "ec2-sensor-1".into()
            })
        );
        apply_outcome(&mut op, Err(ActionFailure::new("API request failed after 3 attempts"))).unwrap();
        assert_eq!(op.phase(), Phase::OneShot(OneShotPhase::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_failure_keeps_output_tail() {
        let mut op = state(OneShotAction::AddToFleet {
            address: "192.168.22.239".into(),
            port: 4443,
        });
        apply_precondition(&mut op, ProbeResult::Satisfied(())).unwrap();
        let output = (1..=8).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        apply_outcome(
            &mut op,
            Err(ActionFailure {
                error: "command exited with status 1".into(),
                output: Some(output),
            }),
        )
        .unwrap();

        let log: Vec<String> = op.log().iter().map(|e| e.message.clone()).collect();
        assert!(!log.iter().any(|l| l.contains("line 3")));
        assert!(log.iter().any(|l| l.contains("line 4")));
        assert!(log.iter().any(|l| l.contains("line 8")));
        assert_eq!(op.last_error(), Some("command exited with status 1"));
    }

    #[test]
    fn test_traffic_status_interpretation() {
        let status = OneShotAction::Traffic(TrafficAction::Status);
        assert_eq!(status.interpret("\n").unwrap(), "Traffic generator not running");
        assert!(status
            .interpret("broala 123 python3 simple_traffic_generator.py\n")
            .unwrap()
            .starts_with("Traffic generator running"));
    }
}
