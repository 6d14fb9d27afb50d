//! Error types for the orchestrator and its collaborators

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors from the control-plane HTTP client
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a failure status
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON
    #[error("failed to parse response: {0}")]
    Decode(String),

    /// Create succeeded but did not name the new sensor
    #[error("no sensor name in response")]
    MissingName,

    /// Every attempt of a retryable call failed
    #[error("API request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ControlPlaneError>,
    },
}

/// Errors from running a command on a sensor.
///
/// The gateway reports what happened; callers decide what it means via
/// [`FailureCategory::from_remote`].
#[derive(Error, Debug)]
pub enum RemoteError {
    /// No usable address to connect to
    #[error("invalid host address: {0:?}")]
    InvalidHost(String),

    /// TCP connect failed
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or command exceeded its deadline
    #[error("connection to {host} timed out after {after:?}")]
    Timeout { host: String, after: Duration },

    /// The server rejected every offered credential
    #[error("authentication rejected by {host} for user {user}")]
    AuthRejected { host: String, user: String },

    /// The configured private key could not be loaded
    #[error("failed to load private key {path}: {message}")]
    KeyLoad { path: String, message: String },

    /// Neither a key nor a password is configured
    #[error("no SSH key or password configured")]
    NoCredentials,

    /// SSH protocol error after connecting
    #[error("SSH error: {0}")]
    Ssh(String),

    /// The command ran and exited non-zero
    #[error("command exited with status {code}")]
    ExitStatus { code: u32, output: String },
}

impl RemoteError {
    /// Captured output of a command that exited non-zero
    pub fn output(&self) -> Option<&str> {
        match self {
            RemoteError::ExitStatus { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

/// Errors the orchestrator raises when a request cannot be honoured
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// A non-terminal operation of this kind already exists for the sensor
    #[error("{kind} already in progress for {target}")]
    AlreadyActive { target: String, kind: String },

    #[error("no operation {0}")]
    NotFound(String),

    /// Sensor is not in the cached inventory
    #[error("unknown sensor {0}")]
    UnknownSensor(String),

    /// Sensor has no usable address yet
    #[error("sensor {0} has no address yet")]
    NoAddress(String),

    /// Upgrade confirmed before upgrade information was loaded
    #[error("upgrade information for {0} has not been loaded")]
    UpgradeInfoMissing(String),

    /// "Apply latest" with nothing to apply
    #[error("no updates available")]
    NoUpdatesAvailable,

    /// Explicit upgrade version was empty
    #[error("no target version specified")]
    EmptyTargetVersion,

    /// Attempted to move a phase backwards
    #[error("phase regression from {from} to {to}")]
    PhaseRegression { from: String, to: String },

    #[error("invalid traffic parameters: {0}")]
    InvalidTraffic(String),

    /// The orchestrator loop is no longer running
    #[error("orchestrator is not running")]
    Stopped,
}

/// Failure categories callers derive from gateway and API errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ConnectionRefused,
    Timeout,
    NoRoute,
    AuthFailure,
    CommandFailed,
    EmptyResponse,
    ConfigError,
    Api,
    Other,
}

impl FailureCategory {
    /// Classify a gateway error
    pub fn from_remote(err: &RemoteError) -> Self {
        match err {
            RemoteError::Connect { source, .. } => match source.kind() {
                std::io::ErrorKind::ConnectionRefused => FailureCategory::ConnectionRefused,
                std::io::ErrorKind::TimedOut => FailureCategory::Timeout,
                _ => Self::from_message(&source.to_string()),
            },
            RemoteError::Timeout { .. } => FailureCategory::Timeout,
            RemoteError::AuthRejected { .. }
            | RemoteError::KeyLoad { .. }
            | RemoteError::NoCredentials => FailureCategory::AuthFailure,
            RemoteError::ExitStatus { .. } => FailureCategory::CommandFailed,
            RemoteError::Ssh(message) => Self::from_message(message),
            RemoteError::InvalidHost(_) => FailureCategory::Other,
        }
    }

    /// Classify free-form error text, for errors that only carry a message
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("connection refused") {
            FailureCategory::ConnectionRefused
        } else if lower.contains("timed out") || lower.contains("timeout") {
            FailureCategory::Timeout
        } else if lower.contains("no route to host") || lower.contains("unreachable") {
            FailureCategory::NoRoute
        } else if lower.contains("permission denied") || lower.contains("authentication") {
            FailureCategory::AuthFailure
        } else {
            FailureCategory::Other
        }
    }

    /// Troubleshooting steps shown with a rejected precondition
    pub fn hints(self) -> &'static [&'static str] {
        match self {
            FailureCategory::ConnectionRefused => &[
                "Sensor may still be starting up",
                "Wait a few minutes and try again",
            ],
            FailureCategory::Timeout => &[
                "Check network connectivity to sensor",
                "Verify sensor IP is correct",
            ],
            FailureCategory::AuthFailure => &[
                "Check SSH keys are configured",
                "Verify SSH username is correct",
            ],
            FailureCategory::CommandFailed
            | FailureCategory::ConfigError
            | FailureCategory::EmptyResponse => &[
                "broala-config may not be installed yet",
                "Sensor may still be initializing",
                "Wait for sensor to finish starting up",
            ],
            FailureCategory::NoRoute => &["Check VPN connection", "Verify network routing"],
            FailureCategory::Api | FailureCategory::Other => &[
                "Check sensor status in AWS console",
                "Try refreshing the sensor list",
            ],
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCategory::ConnectionRefused => "SSH refused",
            FailureCategory::Timeout => "SSH timeout",
            FailureCategory::NoRoute => "no route",
            FailureCategory::AuthFailure => "auth failed",
            FailureCategory::CommandFailed => "command failed",
            FailureCategory::EmptyResponse => "empty response",
            FailureCategory::ConfigError => "config error",
            FailureCategory::Api => "API error",
            FailureCategory::Other => "SSH error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_connect_errors() {
        let refused = RemoteError::Connect {
            host: "10.0.0.1".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(
            FailureCategory::from_remote(&refused),
            FailureCategory::ConnectionRefused
        );

        let no_route = RemoteError::Connect {
            host: "10.0.0.1".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "No route to host (os error 113)"),
        };
        assert_eq!(FailureCategory::from_remote(&no_route), FailureCategory::NoRoute);
    }

    #[test]
    fn test_classify_auth_and_exit() {
        let auth = RemoteError::AuthRejected {
            host: "h".into(),
            user: "broala".into(),
        };
        assert_eq!(FailureCategory::from_remote(&auth), FailureCategory::AuthFailure);

        let exit = RemoteError::ExitStatus {
            code: 2,
            output: "boom".into(),
        };
        assert_eq!(FailureCategory::from_remote(&exit), FailureCategory::CommandFailed);
        assert_eq!(exit.output(), Some("boom"));
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(FailureCategory::AuthFailure.to_string(), "auth failed");
        assert_eq!(FailureCategory::ConnectionRefused.to_string(), "SSH refused");
    }
}
