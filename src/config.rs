use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Overrides the directory that holds the default store.
pub const HOME_ENV: &str = "ACTIVITY_TRACKER_HOME";
const DB_FILE_NAME: &str = "activity.sqlite3";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    pub db_path: Option<PathBuf>,
    pub flush_interval_ms: u64,
    pub debounce_ms: u64,
    pub settle_secs: i64,
    pub channel_capacity: usize,
    pub timer_flush: bool,
    pub history_lookback_secs: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            flush_interval_ms: 1_000,
            debounce_ms: 500,
            settle_secs: 1,
            channel_capacity: 4_096,
            timer_flush: true,
            history_lookback_secs: 24 * 60 * 60,
        }
    }
}

impl TrackerConfig {
    /// Reads a JSON config file. Missing keys fall back to defaults; a missing
    /// file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Store location: the configured path, else `$ACTIVITY_TRACKER_HOME`,
    /// else `$HOME/.local/share/activity-tracker`, else the working directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        default_data_dir().join(DB_FILE_NAME)
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("activity-tracker"),
        None => PathBuf::from("."),
    }
}
