//! Runtime node abstraction.
//!
//! Two node kinds share one control surface:
//! - **`StageNode`**: a stage with its own sockets, flow controller and processor.
//! - **`Compound`**: a container whose state is aggregated from its children.
//!
//! Compounds hold their children as `Arc<dyn Node>`, so nesting is free.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::NodeId;
use crate::pipeline::socket::{InputSocket, OutputSocket};
use crate::pipeline::state::{StageListener, StageState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Scheduling discipline of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Process on the sending thread.
    Inline,
    /// One dedicated thread per stage.
    #[default]
    Threaded,
    /// Up to `threads` rounds at once; outputs keep scheduling order.
    Pool { threads: usize },
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::Inline => write!(f, "inline"),
            ProcessingMode::Threaded => write!(f, "threaded"),
            ProcessingMode::Pool { threads } => write!(f, "pool({})", threads),
        }
    }
}

/// Control surface shared by stages and compounds.
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    fn name(&self) -> &str;

    fn state(&self) -> StageState;

    /// Validate connections and configuration. Only valid while stopped.
    fn check(&self, reset: bool) -> PipelineResult<()>;

    /// Start from `Stopped` or resume from `Paused`.
    fn start(&self) -> PipelineResult<()>;

    /// Request a pause. Only valid while running.
    fn pause(&self) -> PipelineResult<()>;

    /// Request a graceful stop. Only valid while starting or running.
    fn stop(&self) -> PipelineResult<()>;

    /// Cancel all activity and force `Stopped`. A no-op when already stopped.
    fn interrupt(&self);

    /// Apply (or schedule) the cached property set `set`.
    fn reconfigure(&self, set: &str) -> PipelineResult<()>;

    fn add_listener(&self, listener: Arc<dyn StageListener>);

    fn remove_listener(&self, listener: &Arc<dyn StageListener>);

    fn input(&self, name: &str) -> Option<Arc<InputSocket>>;

    fn output(&self, name: &str) -> Option<Arc<OutputSocket>>;

    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;

    /// Remove every connection of this node's sockets.
    fn detach(&self);

    /// Block until the node reaches `state`; `false` on timeout.
    fn wait_for(&self, state: StageState, timeout: Duration) -> bool;

    fn children(&self) -> Vec<Arc<dyn Node>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Holder {
        mode: ProcessingMode,
    }

    #[test]
    fn test_mode_from_toml() {
        let inline: Holder = toml::from_str("mode = \"inline\"").unwrap();
        assert_eq!(inline.mode, ProcessingMode::Inline);
        let pool: Holder = toml::from_str("mode = { pool = { threads = 3 } }").unwrap();
        assert_eq!(pool.mode, ProcessingMode::Pool { threads: 3 });
        assert_eq!(pool.mode.to_string(), "pool(3)");
        assert_eq!(ProcessingMode::default(), ProcessingMode::Threaded);
    }
}
