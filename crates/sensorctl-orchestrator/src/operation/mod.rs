//! Operation state tracked by the orchestrator
//!
//! One [`OperationState`] exists per `(target, kind)` pair. Its phase only
//! ever moves forward; the per-kind modules decide when it moves.

pub mod deploy;
pub mod oneshot;
pub mod upgrade;

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use sensorctl_core::time::format_elapsed;

use crate::error::OperationError;

pub use deploy::{DeployPhase, DeployProbe, Deployment};
pub use oneshot::{OneShot, OneShotAction, OneShotPhase, TrafficAction, TrafficProtocol, TrafficSpec};
pub use upgrade::{UpgradeInfo, UpgradeMonitor, UpgradeObservation, UpgradePhase, UpgradeTarget};

/// Target label used for deployments, whose sensor name is unknown until
/// the control plane assigns one
pub const DEPLOY_TARGET: &str = "new-sensor";

/// Kind of long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deploy,
    Upgrade,
    EnableFeatures,
    AddToFleet,
    ConfigureTraffic,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::Deploy => "deploy",
            OperationKind::Upgrade => "upgrade",
            OperationKind::EnableFeatures => "enable-features",
            OperationKind::AddToFleet => "add-to-fleet",
            OperationKind::ConfigureTraffic => "traffic",
            OperationKind::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// Identity of an operation: at most one active per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OperationKey {
    pub target: String,
    pub kind: OperationKind,
}

impl OperationKey {
    pub fn new(target: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }

    pub fn deploy() -> Self {
        Self::new(DEPLOY_TARGET, OperationKind::Deploy)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)
    }
}

/// Current stage of an operation, ordered within each family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "family", content = "phase", rename_all = "snake_case")]
pub enum Phase {
    Deploy(DeployPhase),
    Upgrade(UpgradePhase),
    OneShot(OneShotPhase),
}

impl Phase {
    /// Position within the phase family
    pub fn rank(self) -> u8 {
        match self {
            Phase::Deploy(p) => p as u8,
            Phase::Upgrade(p) => p as u8,
            Phase::OneShot(p) => p as u8,
        }
    }

    fn same_family(self, other: Phase) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Phase::Deploy(DeployPhase::Failed)
                | Phase::Upgrade(UpgradePhase::Failed)
                | Phase::OneShot(OneShotPhase::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self.is_failed()
            || matches!(
                self,
                Phase::Deploy(DeployPhase::Ready)
                    | Phase::Upgrade(UpgradePhase::Succeeded)
                    | Phase::OneShot(OneShotPhase::Succeeded)
            )
    }

    fn failed_for(self) -> Phase {
        match self {
            Phase::Deploy(_) => Phase::Deploy(DeployPhase::Failed),
            Phase::Upgrade(_) => Phase::Upgrade(UpgradePhase::Failed),
            Phase::OneShot(_) => Phase::OneShot(OneShotPhase::Failed),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Deploy(p) => write!(f, "{:?}", p),
            Phase::Upgrade(p) => write!(f, "{:?}", p),
            Phase::OneShot(p) => write!(f, "{:?}", p),
        }
    }
}

/// One timestamped log line, stamped relative to operation start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub elapsed: Duration,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", format_elapsed(self.elapsed), self.message)
    }
}

/// Rolling log that keeps the newest `capacity` entries
#[derive(Debug, Clone)]
pub struct OperationLog {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, elapsed: Duration, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            elapsed,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// Kind-specific data carried by an operation
#[derive(Debug, Clone)]
pub enum OperationDetail {
    Deploy(Deployment),
    Upgrade(UpgradeMonitor),
    OneShot(OneShot),
}

/// The orchestrator's record of one operation against one target
#[derive(Debug, Clone)]
pub struct OperationState {
    key: OperationKey,
    phase: Phase,
    started_at: Instant,
    phase_started_at: Instant,
    log: OperationLog,
    active: bool,
    detached: bool,
    last_error: Option<String>,
    pub(crate) detail: OperationDetail,
    /// When the next step should be dispatched; `None` while waiting on a task
    pub(crate) next_due: Option<Instant>,
    /// A task for this operation is running
    pub(crate) in_flight: bool,
}

impl OperationState {
    pub fn new(key: OperationKey, phase: Phase, detail: OperationDetail, log_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            key,
            phase,
            started_at: now,
            phase_started_at: now,
            log: OperationLog::new(log_capacity),
            active: true,
            detached: false,
            last_error: None,
            detail,
            next_due: Some(now),
            in_flight: false,
        }
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn kind(&self) -> OperationKind {
        self.key.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn phase_elapsed(&self) -> Duration {
        self.phase_started_at.elapsed()
    }

    pub fn detail(&self) -> &OperationDetail {
        &self.detail
    }

    /// Move to `to`. Staying put is allowed; going back is not.
    pub fn advance_to(&mut self, to: Phase) -> Result<(), OperationError> {
        if !self.phase.same_family(to) || to.rank() < self.phase.rank() {
            return Err(OperationError::PhaseRegression {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        if to != self.phase {
            tracing::debug!("{}: {} -> {}", self.key, self.phase, to);
            self.phase = to;
            self.phase_started_at = Instant::now();
        }
        Ok(())
    }

    pub fn push_log(&mut self, message: impl Into<String>) {
        let elapsed = self.elapsed();
        self.log.push(elapsed, message);
    }

    /// Run the next step at `at`
    pub(crate) fn schedule(&mut self, at: Instant) {
        self.in_flight = false;
        self.next_due = Some(at);
    }

    pub(crate) fn schedule_in(&mut self, delay: Duration) {
        self.schedule(Instant::now() + delay);
    }

    /// Ready for dispatch at `now`
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.active && !self.in_flight && self.next_due.map_or(false, |due| due <= now)
    }

    pub(crate) fn mark_dispatched(&mut self) {
        self.in_flight = true;
        self.next_due = None;
    }

    /// Terminal success; the phase is set by the caller beforehand
    pub(crate) fn complete(&mut self, message: impl Into<String>) {
        self.push_log(message);
        self.finish();
    }

    /// Terminal failure from any phase
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::error!("{} failed: {}", self.key, error);
        self.phase = self.phase.failed_for();
        self.phase_started_at = Instant::now();
        self.push_log(format!("✗ {}", error));
        self.last_error = Some(error);
        self.finish();
    }

    fn finish(&mut self) {
        self.active = false;
        self.in_flight = false;
        self.next_due = None;
    }

    /// Soft cancel: stop showing it, keep driving it
    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deploy_state() -> OperationState {
        OperationState::new(
            OperationKey::deploy(),
            Phase::Deploy(DeployPhase::Requested),
            OperationDetail::Deploy(Deployment::default()),
            20,
        )
    }

    #[test]
    fn test_log_is_capped() {
        let mut log = OperationLog::new(20);
        for i in 0..500 {
            log.push(Duration::from_secs(i), format!("line {}", i));
        }
        assert_eq!(log.len(), 20);
        assert_eq!(log.iter().next().unwrap().message, "line 480");
        assert_eq!(log.iter().last().unwrap().message, "line 499");
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry {
            elapsed: Duration::from_secs(90),
            message: "[Phase 1/3] Waiting for SSH port...".into(),
        };
        assert_eq!(entry.to_string(), "[1m30s] [Phase 1/3] Waiting for SSH port...");
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_never_regresses() {
        let mut op = deploy_state();
        op.advance_to(Phase::Deploy(DeployPhase::Seeding)).unwrap();
        op.advance_to(Phase::Deploy(DeployPhase::Seeding)).unwrap();

        let err = op
            .advance_to(Phase::Deploy(DeployPhase::SshPortWait))
            .unwrap_err();
        assert!(matches!(err, OperationError::PhaseRegression { .. }));
        assert_eq!(op.phase(), Phase::Deploy(DeployPhase::Seeding));

        assert!(op.advance_to(Phase::Upgrade(UpgradePhase::Monitoring)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_clock_resets_on_advance() {
        let mut op = deploy_state();
        tokio::time::advance(Duration::from_secs(30)).await;
        op.advance_to(Phase::Deploy(DeployPhase::ApiPending)).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(op.elapsed(), Duration::from_secs(35));
        assert_eq!(op.phase_elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_is_terminal() {
        let mut op = deploy_state();
        op.fail("create failed");
        assert!(!op.is_active());
        assert_eq!(op.phase(), Phase::Deploy(DeployPhase::Failed));
        assert_eq!(op.last_error(), Some("create failed"));
        assert!(!op.is_due(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_bookkeeping() {
        let mut op = deploy_state();
        let now = Instant::now();
        assert!(op.is_due(now));

        op.mark_dispatched();
        assert!(!op.is_due(now));

        op.schedule_in(Duration::from_secs(10));
        assert!(!op.is_due(Instant::now()));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(op.is_due(Instant::now()));

        op.detach();
        assert!(op.is_detached());
        assert!(op.is_active());
    }
}
