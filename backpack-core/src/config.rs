//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/backpacktrack/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/backpacktrack/` (~/.config/backpacktrack/)
//! - Data: `$XDG_DATA_HOME/backpacktrack/` (~/.local/share/backpacktrack/)
//! - State/Logs: `$XDG_STATE_HOME/backpacktrack/` (~/.local/state/backpacktrack/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "backpacktrack";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Store location and connection settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store location and connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the store file (defaults to the XDG data dir)
    pub data_dir: Option<PathBuf>,

    /// File name of the store
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// File name used by releases before the store was renamed
    #[serde(default = "default_legacy_database_name")]
    pub legacy_database_name: String,

    /// How long a connection waits on a locked store before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_name: default_database_name(),
            legacy_database_name: default_legacy_database_name(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(Error::Config(
                "storage.database_name must not be empty".to_string(),
            ));
        }
        if self.database_name == self.legacy_database_name {
            return Err(Error::Config(
                "storage.legacy_database_name must differ from storage.database_name".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_database_name() -> String {
    "BackPackTrackII".to_string()
}

fn default_legacy_database_name() -> String {
    "BACKPACKTRACKII".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
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
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.storage.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/backpacktrack/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// Returns the default data directory path (for the store file)
    ///
    /// `$XDG_DATA_HOME/backpacktrack/`
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_DIR)
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/backpacktrack/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("backpacktrack.log")
    }

    /// Directory the store lives in, honouring `storage.data_dir`.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(Self::data_dir)
    }

    /// Full path of the store file.
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir().join(&self.storage.database_name)
    }
}
