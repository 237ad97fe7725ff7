//! Result types for command execution

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Handle to a command that has been started but not necessarily finished
///
/// The exit status only exists once the command has completed, so
/// `exit_status` suspends until then. Streams are drained at most once:
/// reading stdout a second time yields an empty string.
#[async_trait]
pub trait CommandResult: Send {
    /// Wait for the command to finish
    ///
    /// # Errors
    /// Returns a transport error if the process or channel fails
    async fn wait(&mut self) -> Result<(), ExecError>;

    /// Exit status, waiting for completion first
    ///
    /// # Errors
    /// Returns a transport error if the process or channel fails
    async fn exit_status(&mut self) -> Result<i32, ExecError>;

    /// Remaining stdout, read until EOF
    ///
    /// # Errors
    /// Returns a transport error if the stream cannot be read
    async fn stdout(&mut self) -> Result<String, ExecError>;

    /// Remaining stderr, read until EOF
    ///
    /// # Errors
    /// Returns a transport error if the stream cannot be read
    async fn stderr(&mut self) -> Result<String, ExecError>;
}

/// Fully drained result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandOutput {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero status into `ExecError::CommandFailed`
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` carrying both streams
    pub fn into_stdout(self) -> Result<String, ExecError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(ExecError::CommandFailed {
                status: self.status,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}
