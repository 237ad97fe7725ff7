//! Local command execution using `tokio::process`

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, instrument};

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::Connection;

/// Connection to the local machine
///
/// Every command runs through `sh -c`, so pipes, redirections and `&&`
/// chains behave as they would on a remote shell.
#[derive(Debug, Clone, Default)]
pub struct LocalConnection {
    config: ConnectionConfig,
    prefixes: Vec<String>,
}

impl LocalConnection {
    /// Create a new local connection without prefixes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn configuration(&self) -> &ConnectionConfig {
        &self.config
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn file_name(&self, path: &str) -> String {
        path.to_string()
    }

    fn with_prefix<I, S>(&self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes = self.prefixes.clone();
        prefixes.extend(fragments.into_iter().map(Into::into));
        Self {
            config: self.config.clone(),
            prefixes,
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn run_result(&self, command: &str) -> Result<Box<dyn CommandResult>, ExecError> {
        let command = self.compose(command);

        debug!(command = %command, "spawning local command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

        Ok(Box::new(LocalResult {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            stdout_buf: Vec::new(),
            stderr_buf: Vec::new(),
            status: None,
        }))
    }
}

/// Handle to a spawned local process
#[derive(Debug)]
pub struct LocalResult {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
    status: Option<i32>,
}

async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[async_trait]
impl CommandResult for LocalResult {
    async fn wait(&mut self) -> Result<(), ExecError> {
        if self.status.is_some() {
            return Ok(());
        }

        // Pipes are drained while waiting so a chatty child cannot block on a
        // full pipe buffer.
        let (stdout, stderr, status) = tokio::try_join!(
            drain(self.stdout.take()),
            drain(self.stderr.take()),
            self.child.wait(),
        )
        .map_err(|e| ExecError::Io(e.to_string()))?;

        self.stdout_buf.extend_from_slice(&stdout);
        self.stderr_buf.extend_from_slice(&stderr);
        self.status = Some(status_code(status));
        Ok(())
    }

    async fn exit_status(&mut self) -> Result<i32, ExecError> {
        self.wait().await?;
        self.status.ok_or(ExecError::MissingExitStatus)
    }

    async fn stdout(&mut self) -> Result<String, ExecError> {
        // Both pipes must be drained together, a full stderr pipe would
        // otherwise stall the child before stdout reaches EOF.
        self.wait().await?;
        Ok(String::from_utf8_lossy(&std::mem::take(&mut self.stdout_buf)).into_owned())
    }

    async fn stderr(&mut self) -> Result<String, ExecError> {
        self.wait().await?;
        Ok(String::from_utf8_lossy(&std::mem::take(&mut self.stderr_buf)).into_owned())
    }
}
