//! Configuration for the usage node
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dataset discovery and reload configuration
    #[serde(default)]
    pub datasets: DatasetsConfig,
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.datasets.merge(other.datasets);
        self.store.merge(other.store);
        self.log.merge(other.log);
    }

    /// Reject configurations the provider cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasets.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("datasets.base_dir is empty".to_string()));
        }
        if self.datasets.required_files.is_empty() {
            return Err(ConfigError::Invalid(
                "datasets.required_files is empty".to_string(),
            ));
        }
        if self.datasets.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "datasets.poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dataset discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetsConfig {
    /// Directory holding one `<version>_<key>` sub-directory per snapshot
    #[serde(default)]
    pub base_dir: PathBuf,
    /// Files every snapshot directory must contain
    #[serde(default = "default_required_files")]
    pub required_files: Vec<String>,
    /// Interval between discovery passes in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Delete superseded snapshot directories after a reload
    #[serde(default)]
    pub remove_old: bool,
}

impl Default for DatasetsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            required_files: default_required_files(),
            poll_interval_secs: default_poll_interval_secs(),
            remove_old: false,
        }
    }
}

impl DatasetsConfig {
    fn merge(&mut self, other: Self) {
        if !other.base_dir.as_os_str().is_empty() {
            self.base_dir = other.base_dir;
        }
        if !other.required_files.is_empty() {
            self.required_files = other.required_files;
        }
        if other.poll_interval_secs > 0 {
            self.poll_interval_secs = other.poll_interval_secs;
        }
        if other.remove_old {
            self.remove_old = true;
        }
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Headerless `gid,owner` CSV
    #[serde(default)]
    pub owners_path: Option<PathBuf>,
    /// Mount points used to resolve history paths for snapshots written
    /// without a persisted mount path
    #[serde(default)]
    pub mount_points: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owners_path: None,
            mount_points: Vec::new(),
        }
    }
}

impl StoreConfig {
    fn merge(&mut self, other: Self) {
        if other.owners_path.is_some() {
            self.owners_path = other.owners_path;
        }
        if !other.mount_points.is_empty() {
            self.mount_points = other.mount_points;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_required_files() -> Vec<String> {
    vec!["dguta.db".to_string(), "basedirs.db".to_string()]
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
