//! russh-backed implementation of the remote command gateway

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::net::TcpStream;

use sensorctl_core::config::SshConfig;

use super::RemoteRunner;
use crate::error::RemoteError;

/// Executes commands on sensors over SSH, one connection per command
pub struct SshGateway {
    config: SshConfig,
    key: Option<Arc<KeyPair>>,
}

impl SshGateway {
    /// Create a gateway, loading the private key up front.
    ///
    /// An explicitly configured key that cannot be loaded is an error; a
    /// missing default key just falls back to password authentication.
    pub fn new(config: SshConfig) -> Result<Self, RemoteError> {
        let key = match config.resolve_key_path() {
            Some(path) if path.exists() => {
                let key = russh_keys::load_secret_key(&path, None).map_err(|e| {
                    RemoteError::KeyLoad {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    }
                })?;
                tracing::debug!("Loaded SSH key from {:?}", path);
                Some(Arc::new(key))
            }
            Some(path) if config.private_key_path.is_some() => {
                return Err(RemoteError::KeyLoad {
                    path: path.display().to_string(),
                    message: "file does not exist".to_string(),
                });
            }
            _ => None,
        };

        if key.is_none() && config.password.is_none() {
            tracing::warn!("No SSH key found and no password configured; remote commands will fail");
        }

        Ok(Self { config, key })
    }

    /// Open and authenticate a session to `host`
    async fn connect(&self, host: &str) -> Result<Handle<AcceptingHandler>, RemoteError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(RemoteError::InvalidHost(host.to_string()));
        }
        if self.key.is_none() && self.config.password.is_none() {
            return Err(RemoteError::NoCredentials);
        }

        let timeout = self.config.connect_timeout;
        let handshake = async {
            let stream = TcpStream::connect((host, self.config.port))
                .await
                .map_err(|source| RemoteError::Connect {
                    host: host.to_string(),
                    source,
                })?;

            let ssh_config = Arc::new(client_config(&self.config));
            let mut session = client::connect_stream(ssh_config, stream, AcceptingHandler)
                .await
                .map_err(|e| RemoteError::Ssh(e.to_string()))?;

            if self.authenticate(&mut session).await? {
                Ok(session)
            } else {
                Err(RemoteError::AuthRejected {
                    host: host.to_string(),
                    user: self.config.username.clone(),
                })
            }
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| RemoteError::Timeout {
                host: host.to_string(),
                after: timeout,
            })?
    }

    /// Try the key first, then the password
    async fn authenticate(
        &self,
        session: &mut Handle<AcceptingHandler>,
    ) -> Result<bool, RemoteError> {
        let user = self.config.username.as_str();

        if let Some(key) = &self.key {
            tracing::trace!("Authenticating as '{}' with public key", user);
            let accepted = session
                .authenticate_publickey(user, Arc::clone(key))
                .await
                .map_err(|e| RemoteError::Ssh(e.to_string()))?;
            if accepted {
                return Ok(true);
            }
        }

        if let Some(password) = &self.config.password {
            tracing::trace!("Authenticating as '{}' with password", user);
            return session
                .authenticate_password(user, password)
                .await
                .map_err(|e| RemoteError::Ssh(e.to_string()));
        }

        Ok(false)
    }
}

#[async_trait]
impl RemoteRunner for SshGateway {
    async fn run(&self, host: &str, command: &str) -> Result<String, RemoteError> {
        let session = self.connect(host).await?;

        let timeout = self.config.command_timeout;
        let exchange = async {
            let mut channel = session
                .channel_open_session()
                .await
                .map_err(|e| RemoteError::Ssh(e.to_string()))?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| RemoteError::Ssh(e.to_string()))?;

            let mut stdout = Vec::new();
            let mut exit_code = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                    _ => {}
                }
            }
            Ok::<_, RemoteError>((stdout, exit_code))
        };
        let result = tokio::time::timeout(timeout, exchange).await;

        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;

        let (stdout, exit_code) = result.map_err(|_| {
            tracing::warn!("Command on {} exceeded {:?}", host, timeout);
            RemoteError::Timeout {
                host: host.to_string(),
                after: timeout,
            }
        })??;

        let output = String::from_utf8_lossy(&stdout).into_owned();
        match exit_code {
            Some(0) => Ok(output),
            Some(code) => Err(RemoteError::ExitStatus { code, output }),
            None => Err(RemoteError::Ssh(format!(
                "channel to {} closed without an exit status",
                host
            ))),
        }
    }

    async fn check_port(&self, host: &str) -> Result<(), RemoteError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(RemoteError::InvalidHost(host.to_string()));
        }
        let timeout = self.config.port_probe_timeout;
        match tokio::time::timeout(timeout, TcpStream::connect((host, self.config.port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(source)) => Err(RemoteError::Connect {
                host: host.to_string(),
                source,
            }),
            Err(_) => Err(RemoteError::Timeout {
                host: host.to_string(),
                after: timeout,
            }),
        }
    }
}

/// Client settings: keepalives detect a dead peer, and a session idle for
/// longer than a whole command is allowed to run is closed.
fn client_config(config: &SshConfig) -> Config {
    Config {
        inactivity_timeout: Some(config.command_timeout),
        keepalive_interval: Some(config.keepalive_interval),
        ..Default::default()
    }
}

/// SSH client handler for sensors.
///
/// Sensors are rebuilt constantly and get fresh host keys each time, so
/// every key is accepted and only logged.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::trace!("Sensor host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_client_config_bounds_idle_sessions() {
        let config = SshConfig {
            command_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(10),
            ..Default::default()
        };
        let client = client_config(&config);
        assert_eq!(client.inactivity_timeout, Some(Duration::from_secs(120)));
        assert_eq!(client.keepalive_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_missing_configured_key_is_an_error() {
        let config = SshConfig {
            private_key_path: Some(PathBuf::from("/nonexistent/sensorctl_test_key")),
            ..Default::default()
        };
        assert!(matches!(
            SshGateway::new(config),
            Err(RemoteError::KeyLoad { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_host_rejected() {
        let gateway = SshGateway {
            config: SshConfig {
                password: Some("secret".to_string()),
                ..Default::default()
            },
            key: None,
        };
        assert!(matches!(
            gateway.run("  ", "echo ok").await,
            Err(RemoteError::InvalidHost(_))
        ));
        assert!(matches!(
            gateway.check_port("").await,
            Err(RemoteError::InvalidHost(_))
        ));
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let gateway = SshGateway {
            config: SshConfig::default(),
            key: None,
        };
        assert!(matches!(
            gateway.run("10.0.0.1", "echo ok").await,
            Err(RemoteError::NoCredentials)
        ));
    }

    #[tokio::test]
    async fn test_check_port_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let gateway = SshGateway {
            config: SshConfig {
                port,
                ..Default::default()
            },
            key: None,
        };
        assert!(gateway.check_port("127.0.0.1").await.is_ok());

        drop(listener);
        let err = gateway.check_port("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Connect { .. }));
    }
}
