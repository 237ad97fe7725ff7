//! kiln-exec: Command execution abstraction
//!
//! Runs shell commands locally or over SSH behind one `Connection` trait,
//! with prefix composition for environment activation.

pub mod config;
pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod shell;
pub mod ssh;
pub mod traits;
pub mod transfer;

pub use config::{ConfigValue, ConnectionConfig};
pub use error::ExecError;
pub use local::LocalConnection;
pub use result::{CommandOutput, CommandResult};
pub use ssh::{HostKeyPolicy, RemoteConnection};
pub use traits::{Connection, compose_command};
