//! kiln-require: Idempotent resource providers
//!
//! Each provider checks whether a resource already matches its desired state
//! before touching it, so `require` can be called any number of times.

pub mod download;
pub mod error;
pub mod lock;
pub mod traits;
pub mod venv;

pub use download::DownloadCache;
pub use error::RequireError;
pub use lock::{ResourceGuard, ResourceLocks};
pub use traits::Provider;
pub use venv::VirtualEnvironment;
