//! Advisory locks keyed by resource identity

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// In-process registry of per-resource locks
///
/// Holding the guard for a key serializes check-then-act sequences on that
/// resource. Nothing outside this process is coordinated. A key's entry
/// lives only while some caller holds or awaits it; a wait cancelled after
/// the last holder left can keep an idle entry until the key is next used.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<LockMap>,
}

impl ResourceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> ResourceGuard<'_> {
        let lock = Arc::clone(self.map().entry(key.to_string()).or_default());

        debug!(key, "acquiring resource lock");
        let guard = lock.lock_owned().await;

        ResourceGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

/// Exclusive access to one resource key, released on drop
#[derive(Debug)]
pub struct ResourceGuard<'a> {
    locks: &'a ResourceLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ResourceGuard<'_> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters clone the Arc under the map lock, so a count of one means
        // nobody else can reach this entry any more.
        let mut locks = self.locks.map();
        let unused = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if unused {
            locks.remove(&self.key);
        }
    }
}
