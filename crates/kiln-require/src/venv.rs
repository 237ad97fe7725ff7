//! Python virtual environment provider

use async_trait::async_trait;
use kiln_exec::Connection;
use tracing::{info, instrument, warn};

use crate::error::RequireError;
use crate::traits::Provider;

const DEFAULT_INTERPRETER: &str = "python3";
const BACKUP_SUFFIX: &str = ".kiln-previous";

/// Ensures a virtual environment built by `interpreter` exists at `location`
///
/// A sandbox whose Python reports a different version than the system
/// interpreter is replaced as a whole; nothing is upgraded in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEnvironment {
    location: String,
    interpreter: String,
}

impl VirtualEnvironment {
    /// Sandbox at `location` built with `python3`
    ///
    /// Trailing slashes are dropped. A location that is empty afterwards is
    /// refused by `require` and `delete`.
    pub fn new(location: impl Into<String>) -> Self {
        let location: String = location.into();
        Self {
            location: location.trim_end_matches('/').to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
        }
    }

    /// Build the sandbox with a specific interpreter, e.g. `python3.12`
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Fragment that activates this sandbox, for `Connection::with_prefix`
    #[must_use]
    pub fn prefix(&self) -> String {
        format!(". {}/bin/activate", self.location)
    }

    /// Predicate: sandbox python exists and matches the interpreter's version
    #[must_use]
    pub fn check_command(&self) -> String {
        let (loc, py) = (&self.location, &self.interpreter);
        format!(
            "test -r {loc}/bin/python \
             && command -v {py} >/dev/null \
             && test \"$({py} --version 2>&1)\" = \"$({loc}/bin/python --version 2>&1)\""
        )
    }

    fn ensure_location(&self) -> Result<(), RequireError> {
        if self.location.is_empty() {
            return Err(RequireError::InvalidLocation(self.location.clone()));
        }
        Ok(())
    }

    fn backup_location(&self) -> String {
        format!("{}{BACKUP_SUFFIX}", self.location)
    }

    /// Put the sandbox that existed before a failed replacement back in place
    async fn restore(&self, conn: &dyn Connection) -> Result<(), kiln_exec::ExecError> {
        let (loc, backup) = (&self.location, self.backup_location());
        conn.run(&format!(
            "rm -rf {loc} && if [ -e {backup} ]; then mv {backup} {loc}; fi"
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for VirtualEnvironment {
    fn resource_key(&self) -> String {
        self.location.clone()
    }

    async fn prepare(&self, _conn: &dyn Connection) -> Result<(), RequireError> {
        self.ensure_location()
    }

    async fn is_satisfied(&self, conn: &dyn Connection) -> Result<bool, RequireError> {
        Ok(conn.test(&self.check_command()).await?)
    }

    /// Replace whatever is at the location with a fresh sandbox
    ///
    /// The previous sandbox is moved aside first and only removed once the
    /// new one has been created. On failure it is moved back.
    #[instrument(skip(self, conn), fields(location = %self.location))]
    async fn create(&self, conn: &dyn Connection) -> Result<(), RequireError> {
        self.ensure_location()?;
        let (loc, backup) = (&self.location, self.backup_location());

        conn.run(&format!(
            "rm -rf {backup} && if [ -e {loc} ]; then mv {loc} {backup}; fi"
        ))
        .await?;

        if let Err(source) = conn
            .run(&format!("{} -m venv {loc}", self.interpreter))
            .await
        {
            warn!(error = %source, "virtualenv creation failed, restoring previous");
            return match self.restore(conn).await {
                Ok(()) => Err(source.into()),
                Err(rollback) => Err(RequireError::RollbackFailed {
                    resource: loc.clone(),
                    source,
                    rollback,
                }),
            };
        }

        conn.run(&format!("rm -rf {backup}")).await?;
        info!(interpreter = %self.interpreter, "virtualenv created");
        Ok(())
    }

    async fn delete(&self, conn: &dyn Connection) -> Result<(), RequireError> {
        self.ensure_location()?;
        conn.run(&format!("rm -rf {}", self.location)).await?;
        info!(location = %self.location, "virtualenv deleted");
        Ok(())
    }
}
