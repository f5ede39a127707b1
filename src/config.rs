//! Per-user configuration file at `~/.gatorconfig.json`.
//!
//! The file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are ignored so older binaries can read newer files.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::util::parse_duration;

pub const CONFIG_FILE_NAME: &str = ".gatorconfig.json";
const DEFAULT_DB_FILE_NAME: &str = ".gator.db";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("HOME environment variable not set")]
    NoHome,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite URL or path. Empty means `~/.gator.db`.
    pub db_url: String,

    /// User set by the last `login` or `register`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// `~/.gatorconfig.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(home_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a JSON file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid JSON → `Err(ConfigError::Parse)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let config: Config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), user = ?config.current_user_name, "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration atomically (temp file, fsync, rename), so a
    /// crash never leaves a truncated file behind.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self)?;
        let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

        let result = (|| -> Result<(), ConfigError> {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&temp_path, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
        }
        result
    }

    /// The database location to open, falling back to `~/.gator.db`
    pub fn database_location(&self) -> Result<String, ConfigError> {
        if !self.db_url.trim().is_empty() {
            return Ok(self.db_url.trim().to_string());
        }
        let path = home_dir()?.join(DEFAULT_DB_FILE_NAME);
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Parse the interval given to `agg`. Zero and unparseable values are rejected.
pub fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    let interval =
        parse_duration(raw).map_err(|e| ConfigError::InvalidInterval(e.to_string()))?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval(format!(
            "{raw:?} (must be positive)"
        )));
    }
    Ok(interval)
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::NoHome)
}

// ============================================================================
// Tests
// ============================================================================
