//! Remote command gateway
//!
//! Every interaction with a sensor goes through [`RemoteRunner`]: run an
//! opaque command string, get raw text back. The gateway never retries and
//! never interprets output; probes and operations do.

pub mod scripts;
mod ssh;

use async_trait::async_trait;

use crate::error::RemoteError;

pub use ssh::SshGateway;

/// Port onto a remote host
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    /// Execute `command` on `host` and return its standard output.
    ///
    /// A non-zero exit status is reported as [`RemoteError::ExitStatus`]
    /// carrying whatever the command printed.
    async fn run(&self, host: &str, command: &str) -> Result<String, RemoteError>;

    /// Bounded-timeout TCP connect to the SSH port, without authenticating
    async fn check_port(&self, host: &str) -> Result<(), RemoteError>;
}
