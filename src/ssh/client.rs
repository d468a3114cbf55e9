// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection, authentication, and bounded, time-limited command execution.

use super::error::{Error, Result};
use crate::executor::TailBuffer;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect, Sig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

/// Configuration for establishing an SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// If None, the SSH agent is tried first, then default key locations.
    pub key_path: Option<PathBuf>,
    /// Accept and remember unknown host keys.
    pub trust_on_first_use: bool,
    /// If None, uses ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
            trust_on_first_use: false,
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Output of a remote command run under a deadline.
#[derive(Debug)]
pub struct RemoteOutput {
    /// None when the command was cut off by the deadline.
    pub exit_code: Option<u32>,
    pub stdout: TailBuffer,
    pub stderr: TailBuffer,
    pub timed_out: bool,
}

/// russh client handler doing known_hosts verification.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let known = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match known {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    host = %self.host,
                    port = self.port,
                    "trust-on-first-use: accepting unknown host key"
                );
                let learned = match &self.known_hosts_path {
                    Some(path) => {
                        learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learned {
                    tracing::warn!("failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!(host = %self.host, "host key changed, refusing connection");
                Ok(false)
            }
            Err(_) => Ok(self.trust_on_first_use),
        }
    }
}

enum AuthMethod {
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

/// An established SSH session.
pub struct Session {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Connect and authenticate.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let auth_method = Self::resolve_auth_method(&config).await?;

        let russh_config = Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
            known_hosts_path: config.known_hosts_path.clone(),
        };

        let connect = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            handler,
        );
        let target = format!("{}:{}", config.host, config.port);
        let mut handle = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout {
                target: target.clone(),
                after: config.connect_timeout,
            })?
            .map_err(|e| Error::Connect {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        if !Self::authenticate(&mut handle, &config, auth_method).await? {
            return Err(Error::AuthenticationFailed {
                user: config.user.clone(),
                target,
            });
        }

        Ok(Self { config, handle })
    }

    async fn resolve_auth_method(config: &SessionConfig) -> Result<AuthMethod> {
        if let Some(key_path) = &config.key_path {
            let key = load_secret_key(key_path, None).map_err(|e| Error::KeyLoad {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(AuthMethod::KeyFile(Arc::new(key)));
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(AuthMethod::Agent(agent));
        }

        let home = std::env::var("HOME").map_err(|_| {
            Error::NoCredentials("SSH agent not available and HOME not set".to_string())
        })?;

        ["id_ed25519", "id_rsa", "id_ecdsa"]
            .iter()
            .find_map(|name| load_secret_key(format!("{home}/.ssh/{name}"), None).ok())
            .map(|key| AuthMethod::KeyFile(Arc::new(key)))
            .ok_or_else(|| {
                Error::NoCredentials(
                    "SSH agent not available and no default keys found".to_string(),
                )
            })
    }

    async fn authenticate(
        handle: &mut Handle<SshHandler>,
        config: &SessionConfig,
        auth_method: AuthMethod,
    ) -> Result<bool> {
        match auth_method {
            AuthMethod::Agent(mut agent) => {
                let keys = agent.request_identities().await.map_err(|e| {
                    Error::NoCredentials(format!("failed to list agent keys: {}", e))
                })?;

                if keys.is_empty() {
                    return Err(Error::NoCredentials("no keys in SSH agent".to_string()));
                }

                for key in &keys {
                    if let Ok(result) = handle
                        .authenticate_publickey_with(&config.user, key.clone(), None, &mut agent)
                        .await
                        && result.success()
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            AuthMethod::KeyFile(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                let result = handle
                    .authenticate_publickey(&config.user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await?;
                Ok(result.success())
            }
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Run a command, keeping the last `limit` bytes of each output stream.
    ///
    /// When the deadline passes the remote process is sent SIGKILL and the
    /// channel is closed; partial output is still returned.
    pub async fn exec_bounded(
        &self,
        command: &str,
        deadline: Duration,
        limit: usize,
    ) -> Result<RemoteOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("open session: {e}")))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("exec: {e}")))?;

        let mut stdout = TailBuffer::new(limit);
        let mut stderr = TailBuffer::new(limit);
        let mut exit_code = None;

        let drained = tokio::time::timeout(deadline, async {
            let mut got_eof = false;
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.push(&data),
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => stderr.push(&data),
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                        if got_eof {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        got_eof = true;
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(host = %self.config.host, ?deadline, "remote command timed out");
            let _ = channel.signal(Sig::KILL).await;
            let _ = channel.close().await;
            return Ok(RemoteOutput {
                exit_code: None,
                stdout,
                stderr,
                timed_out: true,
            });
        }

        // A channel that closes without an exit status means the connection
        // dropped, not that the command finished.
        if exit_code.is_none() {
            return Err(Error::NoExitStatus);
        }

        Ok(RemoteOutput {
            exit_code,
            stdout,
            stderr,
            timed_out: false,
        })
    }

    /// Whether a file exists on the remote host.
    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        let output = self
            .exec_bounded(
                &format!("test -f {} && echo exists", shell_quote(path)),
                Duration::from_secs(30),
                256,
            )
            .await?;
        Ok(output.exit_code == Some(0) && output.stdout.to_string_lossy().trim() == "exists")
    }

    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// Single-quote a string for POSIX sh.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_builder_sets_fields() {
        let config = SessionConfig::new("web1", "deploy")
            .port(2222)
            .trust_on_first_use(true)
            .key_path("/tmp/id_ed25519");
        assert_eq!(config.port, 2222);
        assert!(config.trust_on_first_use);
        assert_eq!(config.key_path, Some(PathBuf::from("/tmp/id_ed25519")));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
