//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/chronicle/config.toml`

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Consolidation configuration
    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WAL store configuration
#[derive(Debug, Deserialize, Default)]
pub struct StorageConfig {
    /// Override path for the database file
    pub database_path: Option<PathBuf>,

    /// Reject appends for sessions without a session row
    #[serde(default)]
    pub strict_sessions: bool,
}

/// Background consolidation configuration
#[derive(Debug, Deserialize)]
pub struct ConsolidationConfig {
    /// Whether the host should run destructive consolidation at all
    #[serde(default = "default_consolidation_enabled")]
    pub enabled: bool,

    /// Seconds between consolidation sweeps over completed turns
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_consolidation_enabled(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_consolidation_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chronicle")
            .join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chronicle")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chronicle")
    }

    /// Returns the database file path, honouring the configured override
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("sessions.db"))
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("chronicle.log")
    }
}
