//! Configuration loading and types

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use eyre::WrapErr;
use kiln_exec::{ConfigValue, ConnectionConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the kiln CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Named SSH targets
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A named remote target
///
/// Every key besides `name` is passed to the connection as an ssh-config
/// parameter (`hostname`, `user`, `port`, `identityfile`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(flatten)]
    pub settings: BTreeMap<String, ConfigValue>,
}

impl TargetConfig {
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        self.settings
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_string()))
            .collect()
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).wrap_err_with(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, `KILN_CONFIG`, or the default locations
    ///
    /// Falls back to defaults when no file exists.
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be read or parsed
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var("KILN_CONFIG") {
            return Self::load(&PathBuf::from(path));
        }

        let paths = [
            Some(PathBuf::from("kiln.toml")),
            dirs::config_dir().map(|p| p.join("kiln/kiln.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }

    /// Find a target by name
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }
}
