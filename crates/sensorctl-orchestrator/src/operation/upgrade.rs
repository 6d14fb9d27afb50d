//! Upgrade launch and progress monitor
//!
//! Upgrades take as long as they take: the sensor reboots, package tooling
//! runs for an unpredictable time, and the version query may not resolve for
//! a while afterwards. The monitor therefore has no timeout and ends only
//! when the installed version has actually changed.

use std::fmt;

use serde::Serialize;

use sensorctl_core::config::TimingConfig;

use super::{OperationDetail, OperationState, Phase};
use crate::error::OperationError;
use crate::probe::{self, ProbeResult, UNKNOWN_VERSION};
use crate::remote::{scripts, RemoteRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    Launching,
    Monitoring,
    Succeeded,
    Failed,
}

/// Read-only facts gathered before an upgrade may be confirmed
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeInfo {
    pub sensor: String,
    pub host: String,
    pub current_version: String,
    pub release_channel: String,
    #[serde(skip)]
    pub admin_password: Option<String>,
    /// Versions offered by the update service, excluding the installed one
    pub available: Vec<String>,
}

impl UpgradeInfo {
    /// Package repository for the sensor's release channel
    pub fn repository(&self) -> &'static str {
        scripts::repository_for_channel(&self.release_channel)
    }

    pub fn has_updates(&self) -> bool {
        !self.available.is_empty()
    }
}

impl fmt::Debug for UpgradeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeInfo")
            .field("sensor", &self.sensor)
            .field("host", &self.host)
            .field("current_version", &self.current_version)
            .field("release_channel", &self.release_channel)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .field("available", &self.available)
            .finish()
    }
}

/// Which upgrade to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeTarget {
    /// Apply whatever the update service offers
    Latest,
    /// Switch repository and install this version
    Version(String),
}

impl UpgradeTarget {
    /// Validate a requested target against the loaded info
    pub fn resolve(requested: Option<&str>, info: &UpgradeInfo) -> Result<Self, OperationError> {
        match requested.map(str::trim) {
            None => {
                if info.has_updates() {
                    Ok(UpgradeTarget::Latest)
                } else {
                    Err(OperationError::NoUpdatesAvailable)
                }
            }
            Some("") => Err(OperationError::EmptyTargetVersion),
            Some(version) => Ok(UpgradeTarget::Version(version.to_string())),
        }
    }

    /// Remote command performing the upgrade
    pub fn command(&self, info: &UpgradeInfo) -> Result<String, String> {
        match self {
            UpgradeTarget::Latest => info
                .admin_password
                .as_deref()
                .map(scripts::updates_apply)
                .ok_or_else(|| "could not retrieve admin password".to_string()),
            UpgradeTarget::Version(version) => {
                Ok(scripts::repository_upgrade(info.repository(), version))
            }
        }
    }
}

impl fmt::Display for UpgradeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeTarget::Latest => write!(f, "latest"),
            UpgradeTarget::Version(v) => write!(f, "{}", v),
        }
    }
}

/// Upgrade-specific operation data
#[derive(Debug, Clone)]
pub struct UpgradeMonitor {
    pub info: UpgradeInfo,
    pub target: UpgradeTarget,
    /// Progress checks performed so far
    pub checks: u32,
    pub final_version: Option<String>,
}

impl UpgradeMonitor {
    pub fn new(info: UpgradeInfo, target: UpgradeTarget) -> Self {
        Self {
            info,
            target,
            checks: 0,
            final_version: None,
        }
    }
}

/// What one progress check saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeObservation {
    /// SSH not answering, usually a reboot
    Unreachable(String),
    /// Package or update tooling still running
    InProgress,
    /// Idle, but the version has not visibly changed yet
    Verifying(String),
    /// New version installed
    Changed(String),
}

/// Next asynchronous action an upgrade needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStep {
    Launch { host: String, command: Result<String, String>, latest: bool },
    Check { host: String, admin_password: String, previous: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeProgress {
    Monitoring,
    Succeeded(String),
    Failed,
    Stale,
}

fn monitor(op: &OperationState) -> Option<&UpgradeMonitor> {
    match op.detail() {
        OperationDetail::Upgrade(m) => Some(m),
        _ => None,
    }
}

fn monitor_mut(op: &mut OperationState) -> Option<&mut UpgradeMonitor> {
    match &mut op.detail {
        OperationDetail::Upgrade(m) => Some(m),
        _ => None,
    }
}

pub fn next_step(op: &OperationState) -> Option<UpgradeStep> {
    let m = monitor(op)?;
    match op.phase() {
        Phase::Upgrade(UpgradePhase::Launching) => Some(UpgradeStep::Launch {
            host: m.info.host.clone(),
            command: m.target.command(&m.info),
            latest: m.target == UpgradeTarget::Latest,
        }),
        Phase::Upgrade(UpgradePhase::Monitoring) => Some(UpgradeStep::Check {
            host: m.info.host.clone(),
            admin_password: m.info.admin_password.clone().unwrap_or_default(),
            previous: m.info.current_version.clone(),
        }),
        _ => None,
    }
}

/// Apply the result of the upgrade command itself
pub fn apply_launch(
    op: &mut OperationState,
    result: Result<(), String>,
    timing: &TimingConfig,
) -> Result<UpgradeProgress, OperationError> {
    if op.phase() != Phase::Upgrade(UpgradePhase::Launching) {
        return Ok(UpgradeProgress::Stale);
    }
    match result {
        Ok(()) => {
            op.advance_to(Phase::Upgrade(UpgradePhase::Monitoring))?;
            op.push_log("Upgrade started, monitoring progress...");
            op.schedule_in(timing.upgrade_first_check);
            Ok(UpgradeProgress::Monitoring)
        }
        Err(e) => {
            op.fail(format!("Upgrade command failed: {}", e));
            Ok(UpgradeProgress::Failed)
        }
    }
}

/// Apply one progress check. Only [`UpgradeObservation::Changed`] ends it.
pub fn apply_observation(
    op: &mut OperationState,
    observation: UpgradeObservation,
    timing: &TimingConfig,
) -> Result<UpgradeProgress, OperationError> {
    if op.phase() != Phase::Upgrade(UpgradePhase::Monitoring) || !op.is_active() {
        return Ok(UpgradeProgress::Stale);
    }
    let previous = match monitor_mut(op) {
        Some(m) => {
            m.checks += 1;
            m.info.current_version.clone()
        }
        None => return Ok(UpgradeProgress::Stale),
    };

    match observation {
        UpgradeObservation::Changed(version) => {
            op.advance_to(Phase::Upgrade(UpgradePhase::Succeeded))?;
            if let Some(m) = monitor_mut(op) {
                m.final_version = Some(version.clone());
            }
            tracing::info!("{}: upgraded {} -> {}", op.key(), previous, version);
            op.complete(format!("✓ Upgrade complete: {} → {}", previous, version));
            Ok(UpgradeProgress::Succeeded(version))
        }
        UpgradeObservation::Unreachable(detail) => {
            op.push_log(format!("Sensor rebooting or SSH unavailable ({})", detail));
            op.schedule_in(timing.upgrade_poll);
            Ok(UpgradeProgress::Monitoring)
        }
        UpgradeObservation::InProgress => {
            op.push_log("Upgrade in progress...");
            op.schedule_in(timing.upgrade_poll);
            Ok(UpgradeProgress::Monitoring)
        }
        UpgradeObservation::Verifying(detail) => {
            op.push_log(format!("Verifying completion ({})", detail));
            op.schedule_in(timing.upgrade_poll);
            Ok(UpgradeProgress::Monitoring)
        }
    }
}

/// Run one progress check: reachability, then activity, then version
pub async fn observe(
    runner: &dyn RemoteRunner,
    host: &str,
    admin_password: &str,
    previous: &str,
) -> UpgradeObservation {
    if let ProbeResult::Error(failure) = probe::service_ready(runner, host).await {
        return UpgradeObservation::Unreachable(failure.category.to_string());
    }

    match probe::process_running(runner, host).await {
        ProbeResult::Satisfied(true) => return UpgradeObservation::InProgress,
        ProbeResult::Error(failure) => {
            return UpgradeObservation::Unreachable(failure.category.to_string())
        }
        _ => {}
    }

    match probe::version_changed(runner, host, admin_password, previous).await {
        ProbeResult::Satisfied(version) => UpgradeObservation::Changed(version),
        ProbeResult::Pending(detail) => UpgradeObservation::Verifying(detail),
        ProbeResult::Error(failure) => UpgradeObservation::Verifying(failure.to_string()),
    }
}

/// Gather upgrade information for a sensor. Side-effect free apart from
/// fixing the management client's cache permissions.
pub async fn load_info(
    runner: &dyn RemoteRunner,
    sensor: &str,
    host: &str,
) -> Result<UpgradeInfo, String> {
    let admin_password = probe::query_admin_password(runner, host)
        .await
        .map_err(|e| format!("could not reach sensor: {}", e))?;

    let current_version = probe::query_version(runner, host, admin_password.as_deref().unwrap_or(""))
        .await
        .unwrap_or_else(|_| UNKNOWN_VERSION.to_string());

    let release_channel = match runner.run(host, scripts::RELEASE_CHANNEL_QUERY).await {
        Ok(output) if !output.trim().is_empty() => output.trim().to_string(),
        _ => "testing".to_string(),
    };

    let available = match &admin_password {
        Some(password) => {
            let _ = runner.run(host, scripts::FIX_CLIENT_CACHE).await;
            let output = runner
                .run(host, &scripts::updates_list(password))
                .await
                .map_err(|e| format!("failed to list updates: {}", e))?;
            scripts::parse_available_updates(&output)
        }
        None => Vec::new(),
    };

    Ok(UpgradeInfo {
        sensor: sensor.to_string(),
        host: host.to_string(),
        current_version,
        release_channel,
        admin_password,
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::operation::{OperationKey, OperationKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn info() -> UpgradeInfo {
        UpgradeInfo {
            sensor: "ec2-sensor-1".into(),
            host: "10.0.0.9".into(),
            current_version: "28.2.0".into(),
            release_channel: "release".into(),
            admin_password: Some("pw".into()),
            available: vec!["28.3.1".into()],
        }
    }

    fn monitoring_state() -> OperationState {
        let mut op = OperationState::new(
            OperationKey::new("ec2-sensor-1", OperationKind::Upgrade),
            Phase::Upgrade(UpgradePhase::Launching),
            OperationDetail::Upgrade(UpgradeMonitor::new(info(), UpgradeTarget::Latest)),
            20,
        );
        apply_launch(&mut op, Ok(()), &TimingConfig::default()).unwrap();
        op
    }

    #[test]
    fn test_resolve_target() {
        let mut info = info();
        assert_eq!(UpgradeTarget::resolve(None, &info).unwrap(), UpgradeTarget::Latest);
        assert_eq!(
            UpgradeTarget::resolve(Some(" 28.4.0 "), &info).unwrap(),
            UpgradeTarget::Version("28.4.0".into())
        );
        assert_eq!(
            UpgradeTarget::resolve(Some(""), &info),
            Err(OperationError::EmptyTargetVersion)
        );

        info.available.clear();
        assert_eq!(
            UpgradeTarget::resolve(None, &info),
            Err(OperationError::NoUpdatesAvailable)
        );
    }

    #[test]
    fn test_target_commands() {
        let mut info = info();
        assert!(UpgradeTarget::Latest.command(&info).unwrap().contains("updates apply"));
        assert_eq!(
            UpgradeTarget::Version("28.3.1".into()).command(&info).unwrap(),
            "sudo broala-update-repository -r brolin-release -R -U 28.3.1 2>&1"
        );

        info.admin_password = None;
        assert!(UpgradeTarget::Latest.command(&info).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        assert!(!format!("{:?}", info()).contains("\"pw\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_schedules_first_check() {
        let timing = TimingConfig::default();
        let op = monitoring_state();
        assert_eq!(op.phase(), Phase::Upgrade(UpgradePhase::Monitoring));
        assert!(!op.is_due(tokio::time::Instant::now()));
        assert!(op.is_due(tokio::time::Instant::now() + timing.upgrade_first_check));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_is_terminal() {
        let mut op = OperationState::new(
            OperationKey::new("ec2-sensor-1", OperationKind::Upgrade),
            Phase::Upgrade(UpgradePhase::Launching),
            OperationDetail::Upgrade(UpgradeMonitor::new(info(), UpgradeTarget::Latest)),
            20,
        );
        let progress =
            apply_launch(&mut op, Err("upgrade may have failed".into()), &TimingConfig::default())
                .unwrap();
        assert_eq!(progress, UpgradeProgress::Failed);
        assert!(!op.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_never_gives_up_on_its_own() {
        let timing = TimingConfig::default();
        let mut op = monitoring_state();

        for i in 0..1000 {
            let observation = match i % 3 {
                0 => UpgradeObservation::Unreachable("SSH refused".into()),
                1 => UpgradeObservation::InProgress,
                _ => UpgradeObservation::Verifying("version not resolvable yet".into()),
            };
            let progress = apply_observation(&mut op, observation, &timing).unwrap();
            assert_eq!(progress, UpgradeProgress::Monitoring);
            assert!(op.is_active());
        }
        assert_eq!(op.log().len(), 20);

        let progress =
            apply_observation(&mut op, UpgradeObservation::Changed("28.3.1".into()), &timing)
                .unwrap();
        assert_eq!(progress, UpgradeProgress::Succeeded("28.3.1".into()));
        assert_eq!(op.phase(), Phase::Upgrade(UpgradePhase::Succeeded));
        assert!(!op.is_active());
        match op.detail() {
            OperationDetail::Upgrade(m) => {
                assert_eq!(m.checks, 1001);
                assert_eq!(m.final_version.as_deref(), Some("28.3.1"));
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    /// Runner replaying canned answers and recording commands
    struct Script {
        answers: Box<dyn Fn(&str) -> Result<String, RemoteError> + Send + Sync>,
        seen: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(answers: impl Fn(&str) -> Result<String, RemoteError> + Send + Sync + 'static) -> Self {
            Self {
                answers: Box::new(answers),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteRunner for Script {
        async fn run(&self, _host: &str, command: &str) -> Result<String, RemoteError> {
            self.seen.lock().unwrap().push(command.to_string());
            (self.answers)(command)
        }

        async fn check_port(&self, _host: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_observe_unreachable_short_circuits() {
        let runner = Script::new(|_| {
            Err(RemoteError::Connect {
                host: "10.0.0.9".into(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            })
        });
        let observation = observe(&runner, "10.0.0.9", "pw", "28.2.0").await;
        assert_eq!(observation, UpgradeObservation::Unreachable("SSH refused".into()));
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_observe_in_progress_skips_version() {
        let runner = Script::new(|cmd| {
            if cmd.starts_with("pgrep") {
                Ok("1234\n".into())
            } else {
                Ok("ok\n".into())
            }
        });
        assert_eq!(
            observe(&runner, "10.0.0.9", "pw", "28.2.0").await,
            UpgradeObservation::InProgress
        );
        assert!(!runner
            .seen
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.contains("information get")));
    }

    #[tokio::test]
    async fn test_observe_version() {
        let same = Script::new(|cmd| {
            if cmd.contains("information get") {
                Ok("28.2.0\n".into())
            } else if cmd.starts_with("pgrep") {
                Ok(String::new())
            } else {
                Ok("ok".into())
            }
        });
        assert!(matches!(
            observe(&same, "h", "pw", "28.2.0").await,
            UpgradeObservation::Verifying(_)
        ));

        let changed = Script::new(|cmd| {
            if cmd.contains("information get") {
                Ok("28.3.1\n".into())
            } else if cmd.starts_with("pgrep") {
                Ok(String::new())
            } else {
                Ok("ok".into())
            }
        });
        assert_eq!(
            observe(&changed, "h", "pw", "28.2.0").await,
            UpgradeObservation::Changed("28.3.1".into())
        );
    }

    #[tokio::test]
    async fn test_load_info() {
        let runner = Script::new(|cmd| {
            if cmd.contains("-A5 'api:'") {
                Ok("s3cret\n".into())
            } else if cmd.contains("information get") {
                Ok("28.2.0\n".into())
            } else if cmd.contains("release_channel") {
                Ok("development\n".into())
            } else if cmd.contains("updates list") {
                Ok("* version: 28.2.0\n  version: 28.3.1\n".into())
            } else {
                Ok(String::new())
            }
        });

        let info = load_info(&runner, "ec2-sensor-1", "10.0.0.9").await.unwrap();
        assert_eq!(info.current_version, "28.2.0");
        assert_eq!(info.release_channel, "development");
        assert_eq!(info.repository(), "brolin-development");
        assert_eq!(info.admin_password.as_deref(), Some("s3cret"));
        assert_eq!(info.available, vec!["28.3.1".to_string()]);
    }
}
