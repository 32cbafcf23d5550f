//! # VisionFlow: synchronized push pipelines
//!
//! Execution core for machine-vision processing graphs. Stages exchange
//! values through bounded socket queues; in-band control tags carry stop,
//! pause, resume and reconfiguration requests through the graph so that
//! every stage finishes, pauses or switches settings at a consistent point.
//!
//! ## Architecture
//!
//! - **Pipeline**: stages, compounds, flow controllers and processors (see [`pipeline`])
//! - **Configuration**: pipeline files and runtime settings (see [`config`])
//! - **Communication**: crossbeam channels for events leaving the pipeline
//!
//! ## Configuration
//!
//! Runtime settings are stored in the platform-appropriate data directory
//! under `visionflow`:
//!
//! - **Linux**: `~/.local/share/visionflow/`
//! - **macOS**: `~/Library/Application Support/visionflow/`
//! - **Windows**: `%APPDATA%\visionflow\`
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use visionflow::{PipelineBuilder, PipelineConfig, RuntimeSettings, StageRegistry};
//!
//! fn main() -> visionflow::Result<()> {
//!     let settings = RuntimeSettings::load_or_default();
//!     let config = PipelineConfig::load("counting.toml")?;
//!     let registry = StageRegistry::with_builtin_stages();
//!
//!     let pipeline = PipelineBuilder::with_settings(&settings).build(&config, &registry)?;
//!     pipeline.start()?;
//!     let report = pipeline.run_to_completion(Some(Duration::from_secs(10)));
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{PipelineConfig, RuntimeSettings};
pub use error::{Error, Result, ResultExt};
pub use pipeline::{
    Compound, Node, Pipeline, PipelineBuilder, PipelineError, PipelineEvent, PipelineResult,
    ProcessingMode, RunReport, StageNode, StageRegistry, StageState,
};
