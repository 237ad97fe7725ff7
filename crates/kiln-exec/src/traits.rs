//! Connection trait

use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::result::{CommandOutput, CommandResult};

/// Prepend activation fragments to a command
///
/// With prefixes `[a, b]` the command `c` becomes `a && b && c`. The command
/// is passed through verbatim; nothing is quoted or escaped.
#[must_use]
pub fn compose_command(prefixes: &[String], command: &str) -> String {
    if prefixes.is_empty() {
        return command.to_string();
    }
    format!("{} && {command}", prefixes.join(" && "))
}

/// Uniform handle for running shell commands against a target
#[async_trait]
pub trait Connection: Send + Sync {
    /// Connection parameters (empty for local execution)
    fn configuration(&self) -> &ConnectionConfig;

    /// Shell fragments prepended to every command, in order
    fn prefixes(&self) -> &[String];

    /// Address of `path` on this target in the form `rsync` expects
    fn file_name(&self, path: &str) -> String;

    /// Derive a connection whose commands run after `fragments`
    ///
    /// The receiver is left untouched.
    fn with_prefix<I, S>(&self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        Self: Sized;

    /// Start `command` and return without waiting for it
    ///
    /// # Errors
    /// Returns a transport error if the command could not be started
    async fn run_result(&self, command: &str) -> Result<Box<dyn CommandResult>, ExecError>;

    /// The exact string sent to the transport for `command`
    fn compose(&self, command: &str) -> String {
        compose_command(self.prefixes(), command)
    }

    /// Run `command` to completion and capture everything it produced
    ///
    /// # Errors
    /// Returns a transport error only; a non-zero status is not an error here
    async fn run_capturing(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();
        let mut result = self.run_result(command).await?;

        let status = result.exit_status().await?;
        let stdout = result.stdout().await?;
        let stderr = result.stderr().await?;
        let duration = start.elapsed();

        debug!(command, status, duration = ?duration, "command completed");

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    /// Run `command` and return its stdout
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` on a non-zero exit status, with
    /// stdout and stderr attached
    async fn run(&self, command: &str) -> Result<String, ExecError> {
        self.run_capturing(command).await?.into_stdout()
    }

    /// Run `command` and report whether it exited with status zero
    ///
    /// # Errors
    /// Returns a transport error only
    async fn test(&self, command: &str) -> Result<bool, ExecError> {
        let mut result = self.run_result(command).await?;
        Ok(result.exit_status().await? == 0)
    }
}
