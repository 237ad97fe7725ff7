//! Error types for kiln-exec

use thiserror::Error;

/// Errors that can occur while executing commands through a connection
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Command ran to completion with a non-zero exit status
    #[error("command failed with status {status}: {}", .stderr.trim_end())]
    CommandFailed {
        /// Exit status code
        status: i32,
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },

    /// Local process could not be spawned
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server host key was not accepted by the configured policy
    #[error("host key rejected for {0}")]
    HostKeyRejected(String),

    /// Identity file could not be resolved or loaded
    #[error("identity file error: {0}")]
    IdentityFile(String),

    /// I/O error while talking to the process or channel
    #[error("I/O error: {0}")]
    Io(String),

    /// Channel closed before the remote side reported an exit status
    #[error("channel closed without exit status")]
    MissingExitStatus,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExecError {
    /// Whether the failure happened before any exit status existed
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !matches!(self, ExecError::CommandFailed { .. })
    }

    /// Exit status of a failed command, if the command ran at all
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
