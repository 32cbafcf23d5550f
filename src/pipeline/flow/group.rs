//! Head evaluation for a set of inputs sharing a group id.

use super::mask::TypeMask;
use super::SyncKind;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::socket::{InputSocket, OutputSocket};
use crate::pipeline::value::{Value, ValueKind};
use std::sync::Arc;

/// What a group's current heads allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GroupDecision {
    Incomplete,
    Process,
    Sync(SyncKind),
    Stop,
    Pause,
    Resume,
    Reconfigure(Arc<str>),
}

/// Connected inputs of one group plus the outputs tags are forwarded to.
pub(crate) struct SocketGroup {
    pub id: i32,
    pub inputs: Vec<Arc<InputSocket>>,
    pub outputs: Vec<Arc<OutputSocket>>,
}

impl SocketGroup {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Evaluate the heads without consuming anything (tags may be jumped forward).
    pub fn decide(&self, stage: &str) -> PipelineResult<GroupDecision> {
        let heads: Vec<Option<Value>> = self.inputs.iter().map(|i| i.head()).collect();
        let mask = heads
            .iter()
            .fold(TypeMask::EMPTY, |mask, head| mask | TypeMask::of(head.as_ref()));

        if heads.is_empty() || mask.contains(TypeMask::NO_OBJECT) {
            return Ok(GroupDecision::Incomplete);
        }
        if mask.is_uniform() {
            return self.uniform(mask, &heads, stage);
        }

        // A pause/resume/reconfigure tag may sit behind objects still
        // buffered in some of the queues.
        for kind in [ValueKind::Pause, ValueKind::Resume, ValueKind::Reconfigure] {
            if !mask.contains(TypeMask::from_kind(kind)) {
                continue;
            }
            let positions: Option<Vec<usize>> = self.inputs.iter().map(|i| i.find(kind)).collect();
            return match positions {
                Some(positions) => {
                    for (input, index) in self.inputs.iter().zip(positions) {
                        input.jump(index);
                    }
                    tracing::debug!("{}: moved {:?} tags to the head of group {}", stage, kind, self.id);
                    self.decide(stage)
                }
                None => Ok(GroupDecision::Incomplete),
            };
        }

        Err(self.mismatch(stage, &heads))
    }

    fn uniform(
        &self,
        mask: TypeMask,
        heads: &[Option<Value>],
        stage: &str,
    ) -> PipelineResult<GroupDecision> {
        let decision = match mask {
            TypeMask::NORMAL => GroupDecision::Process,
            TypeMask::START => GroupDecision::Sync(SyncKind::StartInput),
            TypeMask::END => GroupDecision::Sync(SyncKind::EndInput),
            TypeMask::STOP => GroupDecision::Stop,
            TypeMask::PAUSE => GroupDecision::Pause,
            TypeMask::RESUME => GroupDecision::Resume,
            TypeMask::RECONFIGURE => {
                let mut names = heads.iter().filter_map(|head| match head {
                    Some(Value::Reconfigure(name)) => Some(name.clone()),
                    _ => None,
                });
                let Some(first) = names.next() else {
                    return Err(self.mismatch(stage, heads));
                };
                if names.any(|name| name != first) {
                    return Err(self.mismatch(stage, heads));
                }
                GroupDecision::Reconfigure(first)
            }
            _ => return Err(self.mismatch(stage, heads)),
        };
        Ok(decision)
    }

    fn mismatch(&self, stage: &str, heads: &[Option<Value>]) -> PipelineError {
        let found = self
            .inputs
            .iter()
            .zip(heads)
            .map(|(input, head)| match head {
                Some(value) => format!("{}={:?}", input.name(), value),
                None => format!("{}=<empty>", input.name()),
            })
            .collect::<Vec<_>>()
            .join(", ");
        PipelineError::Synchronization {
            stage: stage.to_string(),
            group: self.id,
            found,
        }
    }

    /// Advance every input of the group.
    pub fn advance_all(&self) {
        for input in &self.inputs {
            input.advance();
        }
    }

    /// Send `value` through every output of the group.
    pub fn forward(&self, value: &Value) -> PipelineResult<()> {
        for output in &self.outputs {
            output.send(value.clone())?;
        }
        Ok(())
    }
}
