//! SSH identity file resolution

use std::path::{Path, PathBuf};

use russh::keys::{PrivateKey, load_secret_key};
use tracing::debug;

/// Identity file resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("cannot load key {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Expand a leading `~` to the current user's home directory
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Private key file used for public key authentication
#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    /// Resolve an `IdentityFile` value from the connection configuration
    ///
    /// # Errors
    /// Returns `KeyError` if the file is missing or readable by group/other
    pub fn resolve(raw: &str) -> Result<Self, KeyError> {
        let path = expand_home(raw);
        if !path.exists() {
            return Err(KeyError::NotFound(path.display().to_string()));
        }
        validate_key_permissions(&path)?;
        debug!(path = %path.display(), "resolved identity file");
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the (unencrypted) private key
    ///
    /// # Errors
    /// Returns `KeyError::Unreadable` if the key cannot be decoded
    pub fn load(&self) -> Result<PrivateKey, KeyError> {
        load_secret_key(&self.path, None).map_err(|e| KeyError::Unreadable {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();

    // Same rule as OpenSSH: no group or other access at all
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}
