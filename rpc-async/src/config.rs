//! Async subsystem configuration.
//!
//! Read from a JSON file; every field is optional and falls back to its
//! default. The default location is `<config dir>/rpc-async/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::WorkerConfig;

const CONFIG_DIR: &str = "rpc-async";
const CONFIG_FILE: &str = "config.json";

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings for spawning and polling async executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    /// Worker executable and subcommand.
    pub worker: WorkerConfig,
    /// Per-execution timeout when a message does not set one.
    pub default_timeout_secs: u64,
    /// Delay between poll rounds of the queue consumer.
    pub poll_interval_ms: u64,
    /// Token the built-in service map requires, if any.
    pub token: Option<String>,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            default_timeout_secs: 60,
            poll_interval_ms: 250,
            token: None,
        }
    }
}

impl AsyncConfig {
    /// Default config file location, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from an explicit path. The file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` when given, else from the default location if a file
    /// exists there, else use defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Poll interval, never shorter than one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
