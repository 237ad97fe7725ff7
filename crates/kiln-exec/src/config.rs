//! Connection configuration record
//!
//! Keys follow `ssh_config(5)` naming and are case-insensitive on input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

const DEFAULT_PORT: u16 = 22;

/// A single configuration value as it may appear in a TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Plain string value
    Str(String),
    /// Integer value, e.g. `port = 2222`
    Int(i64),
    /// Boolean value
    Bool(bool),
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Str(s) => write!(f, "{s}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Bool(true) => write!(f, "yes"),
            ConfigValue::Bool(false) => write!(f, "no"),
        }
    }
}

/// Connection parameters with lower-cased keys
///
/// Empty for a local connection; for a remote one it holds at least
/// `hostname` and `user`, usually also `port` and `identityfile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ConfigValue>", into = "BTreeMap<String, String>")]
pub struct ConnectionConfig {
    entries: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Create an empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, normalizing it to lower case
    #[must_use]
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a key, normalizing it to lower case
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_lowercase(), value.into());
    }

    /// Look up a key case-insensitively
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Iterate over `(key, value)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remote host name or address
    ///
    /// # Errors
    /// Returns `ExecError::Config` if `hostname` is missing
    pub fn hostname(&self) -> Result<&str, ExecError> {
        self.require("hostname")
    }

    /// Login user
    ///
    /// # Errors
    /// Returns `ExecError::Config` if `user` is missing
    pub fn user(&self) -> Result<&str, ExecError> {
        self.require("user")
    }

    /// SSH port, 22 when unset
    ///
    /// # Errors
    /// Returns `ExecError::Config` if `port` is not a valid port number
    pub fn port(&self) -> Result<u16, ExecError> {
        match self.get("port") {
            None => Ok(DEFAULT_PORT),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ExecError::Config(format!("invalid port: {raw}"))),
        }
    }

    /// Path of the private key used for authentication
    #[must_use]
    pub fn identity_file(&self) -> Option<&str> {
        self.get("identityfile")
    }

    fn require(&self, key: &str) -> Result<&str, ExecError> {
        self.get(key)
            .ok_or_else(|| ExecError::Config(format!("missing `{key}`")))
    }

    /// Parse `Key Value` lines as printed by `ssh -G` or `vagrant ssh-config`
    ///
    /// Blank lines and `#` comments are skipped, surrounding double quotes are
    /// stripped from values. When a key repeats the first value wins, as in
    /// OpenSSH.
    #[must_use]
    pub fn parse_ssh_config(text: &str) -> Self {
        let mut config = Self::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);

            let key = key.to_lowercase();
            if !config.entries.contains_key(&key) {
                config.entries.insert(key, value.to_string());
            }
        }

        config
    }
}

impl From<BTreeMap<String, ConfigValue>> for ConnectionConfig {
    fn from(map: BTreeMap<String, ConfigValue>) -> Self {
        map.into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect()
    }
}

impl From<ConnectionConfig> for BTreeMap<String, String> {
    fn from(config: ConnectionConfig) -> Self {
        config.entries
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ConnectionConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Self::new();
        for (k, v) in iter {
            config.insert(k, v);
        }
        config
    }
}
