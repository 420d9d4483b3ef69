//! Startup configuration for the registry connection and logging.
//!
//! # Responsibility
//! - Describe where the registry store lives and how the connection behaves.
//! - Describe the logging sink handed to `init_logging`.
//!
//! # Invariants
//! - Every field has a default, so an empty JSON object is a valid config.
//! - Parsing never opens files or connections.

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Where the registry store is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseLocation {
    /// Private in-memory store, discarded on disconnect.
    #[default]
    Memory,
    File { path: PathBuf },
}

/// Connection settings for [`crate::ModelRegistry::from_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub database: DatabaseLocation,
    pub busy_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database: DatabaseLocation::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl RegistryConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseLocation::File { path: path.into() },
            ..Self::default()
        }
    }

    pub fn from_json_str(value: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(value).map_err(ConfigError::Parse)
    }
}

/// Logging settings for [`crate::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level_string")]
    pub level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: PathBuf,
}

impl LogConfig {
    /// Uses the build-mode default level.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level: default_level_string(),
            log_dir: log_dir.into(),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn from_json_str(value: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(value).map_err(ConfigError::Parse)
    }
}

fn default_level_string() -> String {
    default_log_level().to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid configuration: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
        }
    }
}
