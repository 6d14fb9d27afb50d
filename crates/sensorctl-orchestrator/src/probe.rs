//! Point-in-time checks against a sensor
//!
//! A probe runs one query and reports [`ProbeResult`]. Probes never touch
//! orchestrator state; the caller decides whether `Error` means "try again
//! later" (deployment) or "refuse to start" (one-shot preconditions).

use sensorctl_core::Sensor;

use crate::control_plane::ControlPlane;
use crate::error::{FailureCategory, RemoteError};
use crate::remote::{scripts, RemoteRunner};

/// Version string reported when no query could resolve one
pub const UNKNOWN_VERSION: &str = "unknown";

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult<T> {
    /// Condition not met yet; carries what was observed
    Pending(String),
    Satisfied(T),
    /// The probe itself could not run to a conclusion
    Error(ProbeFailure),
}

impl<T> ProbeResult<T> {
    fn error(category: FailureCategory, detail: impl Into<String>) -> Self {
        ProbeResult::Error(ProbeFailure {
            category,
            detail: detail.into(),
        })
    }

    fn from_remote(err: &RemoteError) -> Self {
        Self::error(FailureCategory::from_remote(err), remote_detail(err))
    }
}

/// Why a probe could not conclude
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub category: FailureCategory,
    pub detail: String,
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.detail)
    }
}

fn remote_detail(err: &RemoteError) -> String {
    match err.output().map(str::trim) {
        Some(output) if !output.is_empty() => format!("{} ({})", err, output),
        _ => err.to_string(),
    }
}

/// Running according to the control plane, with a real address
pub fn evaluate_inventory(sensor: &Sensor) -> ProbeResult<String> {
    if sensor.is_deleted() {
        return ProbeResult::error(FailureCategory::Api, "sensor reported as deleted");
    }
    match sensor.valid_address() {
        Some(address) if sensor.is_ready() => ProbeResult::Satisfied(address.to_string()),
        address => ProbeResult::Pending(format!(
            "status {}, address {}",
            sensor.status,
            address.unwrap_or("not assigned")
        )),
    }
}

pub async fn inventory_running(control_plane: &dyn ControlPlane, name: &str) -> ProbeResult<String> {
    match control_plane.fetch(name).await {
        Ok(sensor) => evaluate_inventory(&sensor),
        Err(e) => ProbeResult::error(FailureCategory::Api, e.to_string()),
    }
}

/// TCP connect to the SSH port
pub async fn port_reachable(runner: &dyn RemoteRunner, host: &str) -> ProbeResult<()> {
    match runner.check_port(host).await {
        Ok(()) => ProbeResult::Satisfied(()),
        Err(e @ (RemoteError::Connect { .. } | RemoteError::Timeout { .. })) => {
            ProbeResult::Pending(format!("SSH port closed ({})", FailureCategory::from_remote(&e)))
        }
        Err(e) => ProbeResult::from_remote(&e),
    }
}

/// A trivial command runs to completion
pub async fn service_ready(runner: &dyn RemoteRunner, host: &str) -> ProbeResult<()> {
    match runner.run(host, scripts::SERVICE_CHECK).await {
        Ok(_) => ProbeResult::Satisfied(()),
        Err(e) => ProbeResult::from_remote(&e),
    }
}

/// Interpret the output of the seeding query.
///
/// Only an exact `1` is success. Empty output and error text are errors,
/// never a silent "not yet".
pub fn evaluate_seeded(output: &str) -> ProbeResult<()> {
    let value = output.trim();
    if value.is_empty() {
        return ProbeResult::error(
            FailureCategory::EmptyResponse,
            "broala-config returned empty response - command may not exist yet",
        );
    }
    if value.contains("error") || value.contains("Error") || value.contains("not found") {
        return ProbeResult::error(
            FailureCategory::ConfigError,
            format!("broala-config error: {}", value),
        );
    }
    if value == "1" {
        ProbeResult::Satisfied(())
    } else {
        ProbeResult::Pending(format!("system.seeded={}", value))
    }
}

pub async fn seeded(runner: &dyn RemoteRunner, host: &str) -> ProbeResult<()> {
    match runner.run(host, scripts::SEEDED_QUERY).await {
        Ok(output) => evaluate_seeded(&output),
        Err(e) => ProbeResult::from_remote(&e),
    }
}

/// Whether package or update tooling is still active
pub async fn process_running(runner: &dyn RemoteRunner, host: &str) -> ProbeResult<bool> {
    match runner.run(host, scripts::UPGRADE_PROCESS_CHECK).await {
        Ok(output) => ProbeResult::Satisfied(!output.trim().is_empty()),
        Err(e) => ProbeResult::from_remote(&e),
    }
}

/// Compare a freshly queried version against the pre-operation one.
///
/// `unknown` never counts as changed. When the previous version was itself
/// unknown, any resolvable version does.
pub fn evaluate_version(previous: &str, current: &str) -> ProbeResult<String> {
    let current = current.trim();
    if current.is_empty() || current == UNKNOWN_VERSION {
        return ProbeResult::Pending("version not resolvable yet".to_string());
    }
    if current == previous.trim() {
        return ProbeResult::Pending(format!("still at {}", current));
    }
    ProbeResult::Satisfied(current.to_string())
}

pub async fn version_changed(
    runner: &dyn RemoteRunner,
    host: &str,
    admin_password: &str,
    previous: &str,
) -> ProbeResult<String> {
    match query_version(runner, host, admin_password).await {
        Ok(current) => evaluate_version(previous, &current),
        Err(e) => ProbeResult::from_remote(&e),
    }
}

/// Admin credential from the sensor's management config
pub async fn query_admin_password(
    runner: &dyn RemoteRunner,
    host: &str,
) -> Result<Option<String>, RemoteError> {
    let mut last_err = None;
    for query in scripts::ADMIN_PASSWORD_QUERIES {
        match runner.run(host, query).await {
            Ok(output) if !output.trim().is_empty() => return Ok(Some(output.trim().to_string())),
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Installed version, trying the management client before the local tool
pub async fn query_version(
    runner: &dyn RemoteRunner,
    host: &str,
    admin_password: &str,
) -> Result<String, RemoteError> {
    if let Ok(output) = runner.run(host, &scripts::version_query(admin_password)).await {
        let version = output.trim();
        if !version.is_empty() && version != UNKNOWN_VERSION {
            return Ok(version.to_string());
        }
    }

    let output = runner.run(host, scripts::VERSION_FALLBACK).await?;
    let version = output.trim();
    if version.is_empty() {
        Ok(UNKNOWN_VERSION.to_string())
    } else {
        Ok(version.to_string())
    }
}
