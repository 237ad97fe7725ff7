//! SSH command execution using russh crate

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::known_hosts::learn_known_hosts_path;
use russh::keys::{PrivateKeyWithHashAlg, check_known_hosts_path};
use russh::{Channel, ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::keys::{IdentityFile, expand_home};
use crate::result::CommandResult;
use crate::traits::Connection;

/// How the server's host key is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Key must already be listed in the known-hosts file
    Strict { known_hosts: PathBuf },
    /// Unknown hosts are learned, changed keys are rejected
    AcceptNew { known_hosts: PathBuf },
    /// Every key is accepted
    Disabled,
}

impl HostKeyPolicy {
    /// Derive the policy from `StrictHostKeyChecking` and `UserKnownHostsFile`
    ///
    /// # Errors
    /// Returns `ExecError::Config` for an unrecognized checking mode
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, ExecError> {
        let known_hosts = config
            .get("userknownhostsfile")
            .and_then(|files| files.split_whitespace().next())
            .map_or_else(|| expand_home("~/.ssh/known_hosts"), expand_home);

        match config
            .get("stricthostkeychecking")
            .map(str::to_lowercase)
            .as_deref()
        {
            None | Some("accept-new" | "ask") => Ok(Self::AcceptNew { known_hosts }),
            Some("yes") => Ok(Self::Strict { known_hosts }),
            Some("no" | "off") => Ok(Self::Disabled),
            Some(other) => Err(ExecError::Config(format!(
                "unknown StrictHostKeyChecking value: {other}"
            ))),
        }
    }
}

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let (known_hosts, learn) = match &self.policy {
            HostKeyPolicy::Disabled => {
                warn!(host = %self.host, "host key verification disabled");
                return Ok(true);
            }
            HostKeyPolicy::Strict { known_hosts } => (known_hosts, false),
            HostKeyPolicy::AcceptNew { known_hosts } => (known_hosts, true),
        };

        match check_known_hosts_path(&self.host, self.port, server_public_key, known_hosts) {
            Ok(true) => Ok(true),
            Ok(false) if learn => {
                info!(host = %self.host, path = %known_hosts.display(), "learning new host key");
                learn_known_hosts_path(&self.host, self.port, server_public_key, known_hosts)?;
                Ok(true)
            }
            Ok(false) => {
                warn!(host = %self.host, "host key not in known hosts");
                Ok(false)
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                warn!(host = %self.host, line, "host key changed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

type Session = Arc<client::Handle<SshClientHandler>>;

/// Connection to a remote host over SSH
///
/// The SSH session is established on first use and shared by every
/// command issued through this connection and any connection derived from
/// it with `with_prefix`. Call `disconnect` to close it.
#[derive(Clone)]
pub struct RemoteConnection {
    config: ConnectionConfig,
    prefixes: Vec<String>,
    hostname: String,
    user: String,
    port: u16,
    host_keys: HostKeyPolicy,
    /// SSH session (initialized on first use)
    session: Arc<Mutex<Option<Session>>>,
}

impl std::fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("config", &self.config)
            .field("prefixes", &self.prefixes)
            .field("host_keys", &self.host_keys)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteConnection {
    /// Create a remote connection from ssh-config style parameters
    ///
    /// No network traffic happens here.
    ///
    /// # Errors
    /// Returns `ExecError::Config` if `hostname` or `user` is missing, the
    /// port is invalid, or the host key checking mode is unknown
    pub fn new(config: ConnectionConfig) -> Result<Self, ExecError> {
        let hostname = config.hostname()?.to_string();
        let user = config.user()?.to_string();
        let port = config.port()?;
        let host_keys = HostKeyPolicy::from_config(&config)?;

        Ok(Self {
            config,
            prefixes: Vec::new(),
            hostname,
            user,
            port,
            host_keys,
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Override the host key policy derived from the configuration
    #[must_use]
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    #[must_use]
    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_keys
    }

    /// Whether the shared session has been established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .try_lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Return the shared session, connecting on first use
    #[instrument(skip(self), fields(host = %self.hostname))]
    async fn session(&self) -> Result<Session, ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.as_ref() {
            return Ok(Arc::clone(session));
        }

        info!(
            host = %self.hostname,
            port = self.port,
            user = %self.user,
            "connecting to SSH"
        );

        let identity = self
            .config
            .identity_file()
            .ok_or_else(|| {
                ExecError::AuthenticationFailed("no IdentityFile configured".to_string())
            })
            .and_then(|raw| {
                IdentityFile::resolve(raw).map_err(|e| ExecError::IdentityFile(e.to_string()))
            })?;
        let key_pair = identity
            .load()
            .map_err(|e| ExecError::IdentityFile(e.to_string()))?;

        let config = Arc::new(client::Config::default());
        let handler = SshClientHandler {
            host: self.hostname.clone(),
            port: self.port,
            policy: self.host_keys.clone(),
        };

        let mut session = client::connect(config, (&self.hostname[..], self.port), handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => ExecError::HostKeyRejected(self.hostname.clone()),
                other => ExecError::ConnectionFailed(other.to_string()),
            })?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &self.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(
                "public key authentication failed".to_string(),
            ));
        }

        info!(host = %self.hostname, "SSH connected and authenticated");

        let session = Arc::new(session);
        *session_lock = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Close the shared session, if one was established
    ///
    /// # Errors
    /// Returns `ExecError::Io` if disconnection fails
    pub async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;
            info!(host = %self.hostname, "SSH disconnected");
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for RemoteConnection {
    fn configuration(&self) -> &ConnectionConfig {
        &self.config
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn file_name(&self, path: &str) -> String {
        format!("{}@{}:{path}", self.user, self.hostname)
    }

    fn with_prefix<I, S>(&self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut derived = self.clone();
        derived
            .prefixes
            .extend(fragments.into_iter().map(Into::into));
        derived
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    async fn run_result(&self, command: &str) -> Result<Box<dyn CommandResult>, ExecError> {
        let command = self.compose(command);
        let session = self.session().await?;

        debug!(command = %command, "opening remote channel");

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        Ok(Box::new(RemoteResult {
            channel: Some(channel),
            stdout: Vec::new(),
            stderr: Vec::new(),
            status: None,
        }))
    }
}

/// Handle to a command running on a remote channel
///
/// stdout and stderr are multiplexed on one channel, so reading either
/// stream drains the channel until it closes and buffers the other.
pub struct RemoteResult {
    channel: Option<Channel<client::Msg>>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<i32>,
}

impl RemoteResult {
    async fn drain(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        // exit-status may arrive after EOF, so read until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    self.stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        self.stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    self.status = Some(exit_status.cast_signed());
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!(signal = ?signal_name, "remote command killed by signal");
                    self.status.get_or_insert(-1);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        self.channel = None;
    }
}

#[async_trait]
impl CommandResult for RemoteResult {
    async fn wait(&mut self) -> Result<(), ExecError> {
        self.drain().await;
        Ok(())
    }

    async fn exit_status(&mut self) -> Result<i32, ExecError> {
        self.drain().await;
        self.status.ok_or(ExecError::MissingExitStatus)
    }

    async fn stdout(&mut self) -> Result<String, ExecError> {
        self.drain().await;
        Ok(String::from_utf8_lossy(&std::mem::take(&mut self.stdout)).into_owned())
    }

    async fn stderr(&mut self) -> Result<String, ExecError> {
        self.drain().await;
        Ok(String::from_utf8_lossy(&std::mem::take(&mut self.stderr)).into_owned())
    }
}
