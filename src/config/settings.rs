//! Runtime settings of the `visionflow` binary
//!
//! Settings apply to every pipeline run by this installation and are read
//! from `settings.toml` in the application data directory. Every field is
//! optional in the file; missing ones take their defaults.
//!
//! ```toml
//! queue_capacity = 4
//! pool_threads = 8
//! log_filter = "info,visionflow=trace"
//! log_dir = "/var/log/visionflow"
//! run_timeout_secs = 30
//! ```

use super::{app_data_dir, ensure_app_data_dir};
use crate::error::{Error, Result};
use crate::pipeline::socket::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings filename inside the app data directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Runtime settings for the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Queue capacity of stage inputs not overridden by the pipeline file
    pub queue_capacity: usize,

    /// Worker count of pool stages declared without an explicit size
    pub pool_threads: usize,

    /// Default tracing filter; `RUST_LOG` takes precedence
    pub log_filter: String,

    /// Directory for daily-rolling log files (console only when unset)
    pub log_dir: Option<PathBuf>,

    /// Interrupt a run that has not stopped after this many seconds (0 = wait forever)
    pub run_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            log_filter: "info,visionflow=debug".to_string(),
            log_dir: None,
            run_timeout_secs: 0,
        }
    }
}

impl RuntimeSettings {
    /// Create new runtime settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the settings file
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(SETTINGS_FILE))
    }

    /// Load settings from `path`
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read settings {:?}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse settings {:?}: {}", path, e)))
    }

    /// Load settings from the default location
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().ok_or_else(|| {
            Error::Config("Could not determine settings path".to_string())
        })?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(path)
    }

    /// Load settings, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        let path = ensure_app_data_dir()?.join(SETTINGS_FILE);

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::Config(format!("Failed to write settings {:?}: {}", path, e)))
    }

    /// The run timeout, if any
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_settings_default() {
        let settings = RuntimeSettings::new();
        assert_eq!(settings.queue_capacity, 2);
        assert!(settings.pool_threads >= 1);
        assert!(settings.log_dir.is_none());
        assert_eq!(settings.run_timeout(), None);
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "queue_capacity = 8\nrun_timeout_secs = 3\n").unwrap();

        let settings = RuntimeSettings::load_from(&path).unwrap();
        assert_eq!(settings.queue_capacity, 8);
        assert_eq!(settings.run_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(settings.log_filter, RuntimeSettings::default().log_filter);
    }

    #[test]
    fn test_invalid_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "queue_capacity = \"many\"").unwrap();

        let err = RuntimeSettings::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_settings_serialization() {
        let settings = RuntimeSettings {
            log_dir: Some(PathBuf::from("/tmp/logs")),
            ..RuntimeSettings::default()
        };
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: RuntimeSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
