//! Provider trait

use async_trait::async_trait;
use kiln_exec::Connection;
use tracing::info;

use crate::error::RequireError;
use crate::lock::ResourceLocks;

/// Description of a desired resource state on some target
///
/// A provider does not own a connection. The same provider can be required
/// against a local and a remote target.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identity of the managed resource, e.g. its path on the target
    fn resource_key(&self) -> String;

    /// Commands that must succeed before the predicate is meaningful
    ///
    /// # Errors
    /// Returns `RequireError` if a preparation command fails
    async fn prepare(&self, _conn: &dyn Connection) -> Result<(), RequireError> {
        Ok(())
    }

    /// Read-only check whether the resource is already in its desired state
    ///
    /// # Errors
    /// Returns `RequireError` on transport failure
    async fn is_satisfied(&self, conn: &dyn Connection) -> Result<bool, RequireError>;

    /// Bring the resource into its desired state
    ///
    /// # Errors
    /// Returns `RequireError` if a mutating command fails
    async fn create(&self, conn: &dyn Connection) -> Result<(), RequireError>;

    /// Remove the resource
    ///
    /// # Errors
    /// Returns `RequireError` if the removal command fails
    async fn delete(&self, conn: &dyn Connection) -> Result<(), RequireError>;

    /// Ensure the resource is in its desired state
    ///
    /// Returns `true` if this call changed anything. A failure leaves the
    /// resource in whatever state the failed command left it.
    ///
    /// # Errors
    /// Returns the first `RequireError` of the check or mutation
    async fn require(&self, conn: &dyn Connection) -> Result<bool, RequireError> {
        self.prepare(conn).await?;

        if self.is_satisfied(conn).await? {
            info!(resource = %self.resource_key(), "already satisfied");
            return Ok(false);
        }

        self.create(conn).await?;
        info!(resource = %self.resource_key(), "created");
        Ok(true)
    }

    /// Like `require`, serialized with other callers holding the same key
    ///
    /// # Errors
    /// Returns the first `RequireError` of the check or mutation
    async fn require_locked(
        &self,
        conn: &dyn Connection,
        locks: &ResourceLocks,
    ) -> Result<bool, RequireError> {
        let _guard = locks.acquire(&self.resource_key()).await;
        self.require(conn).await
    }
}
