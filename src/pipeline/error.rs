//! Pipeline-specific error types.

use crate::pipeline::id::NodeId;
use crate::pipeline::state::StageState;
use std::fmt;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage's own processing step failed.
    #[error("Stage '{stage}' ({node_id}) error: {message}")]
    Processing {
        stage: String,
        node_id: NodeId,
        message: String,
    },

    #[error("Input '{socket}' of '{stage}' is not connected")]
    UnconnectedInput { stage: String, socket: String },

    #[error("Socket direction mismatch: {0}")]
    WrongDirection(String),

    #[error("No socket named '{0}'")]
    UnknownSocket(String),

    #[error("No stage named '{0}'")]
    UnknownStage(String),

    #[error("A stage named '{0}' already exists")]
    DuplicateStage(String),

    #[error("Unknown stage class '{0}'")]
    UnknownClass(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    /// Check failures of several children, aggregated by a compound.
    #[error("{}", CheckFailures(.0))]
    Check(Vec<(String, PipelineError)>),

    /// Inconsistent control tags across a synchronized group.
    #[error("Synchronization error in '{stage}', group {group}: {found}")]
    Synchronization {
        stage: String,
        group: i32,
        found: String,
    },

    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: StageState,
    },

    #[error("Queue capacity must be at least 1 (got {0})")]
    InvalidCapacity(usize),

    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    #[error("Invalid value for property '{name}': {message}")]
    InvalidProperty { name: String, message: String },

    #[error("Unknown property set '{0}'")]
    UnknownPropertySet(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("No processable value on input '{0}'")]
    MissingValue(String),

    /// Cancellation of a blocked send or receive.
    #[error("Operation interrupted")]
    Interrupted,

    #[error("Channel send error")]
    ChannelSend,
}

impl PipelineError {
    /// Convenience constructor for stage implementations.
    pub fn processing(stage: impl Into<String>, node_id: NodeId, message: impl fmt::Display) -> Self {
        PipelineError::Processing {
            stage: stage.into(),
            node_id,
            message: message.to_string(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, PipelineError::Interrupted)
    }
}

struct CheckFailures<'a>(&'a [(String, PipelineError)]);

impl fmt::Display for CheckFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Check failed for {} stage(s)", self.0.len())?;
        for (name, error) in self.0 {
            write!(f, "; {}: {}", name, error)?;
        }
        Ok(())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
