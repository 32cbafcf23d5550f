//! Configuration module for VisionFlow
//!
//! This module handles:
//! - Pipeline files describing stages, connections and property sets
//! - Runtime settings of the binary (see [`settings`])
//!
//! # App Data Location
//!
//! Settings are stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/visionflow/`
//! - **macOS**: `~/Library/Application Support/visionflow/`
//! - **Windows**: `%APPDATA%\visionflow\`
//!
//! # Pipeline files
//!
//! Pipeline files are TOML (`.toml`) or JSON (`.json`):
//!
//! ```toml
//! name = "counting"
//!
//! [[stages]]
//! name = "source"
//! class = "CounterSource"
//! properties = { count = 100 }
//!
//! [[stages]]
//! name = "double"
//! class = "Scale"
//! mode = { pool = { threads = 4 } }
//! properties = { factor = 2.0 }
//! inputs = { in = { capacity = 8 } }
//!
//! [[connections]]
//! from = "source.out"
//! to = "double.in"
//!
//! [property_sets.slow.source]
//! interval_ms = 50
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Error, Result};
use crate::pipeline::node::ProcessingMode;
use crate::pipeline::property::PropertySet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "visionflow";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| Error::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== File Format ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(FileFormat::Toml),
            Some("json") => Ok(FileFormat::Json),
            _ => Err(Error::Config(format!(
                "Unsupported pipeline file {:?}: expected a .toml or .json extension",
                path
            ))),
        }
    }
}

// ==================== Pipeline File ====================

/// Overrides for one input socket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Queue capacity (at least 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,

    /// Synchronization group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<i32>,
}

/// One stage instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Unique name within the pipeline
    pub name: String,

    /// Registered stage class
    pub class: String,

    /// Scheduling discipline; `pool` with zero threads takes the configured default
    #[serde(default)]
    pub mode: ProcessingMode,

    /// Initial property values
    #[serde(default, skip_serializing_if = "PropertySet::is_empty")]
    pub properties: PropertySet,

    /// Per-input overrides, keyed by socket name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputConfig>,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            mode: ProcessingMode::default(),
            properties: PropertySet::new(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }
}

/// One edge, `stage.socket` to `stage.socket`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,
}

/// A complete pipeline description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Name of the root compound
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    #[serde(default)]
    pub stages: Vec<StageConfig>,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    /// Set name → stage name → properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub property_sets: BTreeMap<String, BTreeMap<String, PropertySet>>,
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            stages: Vec::new(),
            connections: Vec::new(),
            property_sets: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Create an empty pipeline description
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load a pipeline file, choosing the format from the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read pipeline file {:?}: {}", path, e))
        })?;

        let config = match format {
            FileFormat::Toml => Self::from_toml(&content),
            FileFormat::Json => Self::from_json(&content),
        }
        .map_err(|e| e.with_context(format!("Pipeline file {:?}", path)))?;

        tracing::info!(
            "Loaded pipeline '{}' from {:?}: {} stages, {} connections",
            config.name,
            path,
            config.stages.len(),
            config.connections.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse pipeline: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse pipeline: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to `path`, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match FileFormat::of(path)? {
            FileFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| Error::Serialization(format!("Failed to serialize pipeline: {}", e)))?,
            FileFormat::Json => serde_json::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Failed to create pipeline directory: {}", e))
                })?;
            }
        }

        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write pipeline file {:?}: {}", path, e))
        })
    }

    /// Structural checks that need no stage registry
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.is_empty() || stage.name.contains('.') {
                return Err(Error::Config(format!(
                    "Invalid stage name '{}': must be non-empty and contain no '.'",
                    stage.name
                )));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(Error::Config(format!("Duplicate stage name '{}'", stage.name)));
            }
            for (socket, input) in &stage.inputs {
                if input.capacity == Some(0) {
                    return Err(Error::Config(format!(
                        "Input '{}.{}' has capacity 0",
                        stage.name, socket
                    )));
                }
            }
        }

        for connection in &self.connections {
            for endpoint in [&connection.from, &connection.to] {
                let Some((stage, socket)) = endpoint.split_once('.') else {
                    return Err(Error::Config(format!(
                        "Connection endpoint '{}' must be 'stage.socket'",
                        endpoint
                    )));
                };
                if socket.is_empty() || !names.contains(stage) {
                    return Err(Error::Config(format!(
                        "Connection endpoint '{}' names no declared stage",
                        endpoint
                    )));
                }
            }
        }

        for (set, stages) in &self.property_sets {
            if let Some(stage) = stages.keys().find(|s| !names.contains(s.as_str())) {
                return Err(Error::Config(format!(
                    "Property set '{}' refers to unknown stage '{}'",
                    set, stage
                )));
            }
        }

        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::property::PropertyValue;

    const SAMPLE: &str = r#"
        name = "sample"

        [[stages]]
        name = "a"
        class = "CounterSource"
        properties = { count = 100 }

        [[stages]]
        name = "b"
        class = "Scale"
        mode = { pool = { threads = 2 } }
        inputs = { in = { capacity = 8, group = 1 } }

        [[connections]]
        from = "a.out"
        to = "b.in"

        [property_sets.slow.a]
        interval_ms = 5
    "#;

    #[test]
    fn test_parse_toml_pipeline() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.name, "sample");
        assert_eq!(config.stages.len(), 2);

        let a = config.stage("a").unwrap();
        assert_eq!(a.mode, ProcessingMode::Threaded);
        assert_eq!(a.properties.get("count"), Some(&PropertyValue::Int(100)));

        let b = config.stage("b").unwrap();
        assert_eq!(b.mode, ProcessingMode::Pool { threads: 2 });
        assert_eq!(
            b.inputs.get("in"),
            Some(&InputConfig {
                capacity: Some(8),
                group: Some(1)
            })
        );

        assert_eq!(config.connections[0].to, "b.in");
        assert_eq!(
            config.property_sets["slow"]["a"].get("interval_ms"),
            Some(&PropertyValue::Int(5))
        );
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let text = r#"
            [[stages]]
            name = "a"
            class = "Passthrough"
            [[stages]]
            name = "a"
            class = "Collector"
        "#;
        let err = PipelineConfig::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("Duplicate stage name 'a'"));
    }

    #[test]
    fn test_malformed_connection_rejected() {
        let mut config = PipelineConfig::new("p");
        config.stages.push(StageConfig::new("a", "CounterSource"));
        config.connections.push(ConnectionConfig {
            from: "a".to_string(),
            to: "b.in".to_string(),
        });
        assert!(config.validate().is_err());

        config.connections[0].from = "a.out".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("b.in"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = r#"
            [[stages]]
            name = "a"
            class = "Passthrough"
            colour = "red"
        "#;
        assert!(PipelineConfig::from_toml(text).is_err());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.json");
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();

        config.save(&path).unwrap();
        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = PipelineConfig::load("pipeline.yaml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
