//! Error types for kiln-require

use kiln_exec::ExecError;
use thiserror::Error;

/// Errors that can occur while requiring a resource
#[derive(Error, Debug, Clone)]
pub enum RequireError {
    /// A check or mutation command failed
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Replacing a resource failed and restoring the previous one failed too
    #[error("{resource}: {source}; restoring the previous state also failed: {rollback}")]
    RollbackFailed {
        /// Resource key
        resource: String,
        /// Error that aborted the replacement
        source: ExecError,
        /// Error from the restore attempt
        rollback: ExecError,
    },

    /// The provider was given a location it refuses to manage
    #[error("invalid location: {0:?}")]
    InvalidLocation(String),
}

impl RequireError {
    /// The command failure that aborted the operation, if a command ran
    #[must_use]
    pub fn exec_error(&self) -> Option<&ExecError> {
        match self {
            RequireError::Exec(e) | RequireError::RollbackFailed { source: e, .. } => Some(e),
            RequireError::InvalidLocation(_) => None,
        }
    }
}
