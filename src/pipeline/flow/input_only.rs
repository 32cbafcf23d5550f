//! Controller for a stage with exactly one connected input.

use super::group::{GroupDecision, SocketGroup};
use super::{apply_decision, FlowState, SyncKind, SyncListener};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::value::Value;

pub struct InputOnlyController {
    group: SocketGroup,
}

impl InputOnlyController {
    pub(crate) fn new(group: SocketGroup) -> Self {
        debug_assert_eq!(group.inputs.len(), 1);
        Self { group }
    }

    pub(crate) fn group(&self) -> &SocketGroup {
        &self.group
    }

    pub fn prepare_process(
        &mut self,
        _stage: &str,
        listener: &dyn SyncListener,
    ) -> PipelineResult<FlowState> {
        // A single queue never has mixed heads; map the head directly.
        let head = self.group.inputs.first().and_then(|input| input.head());
        let decision = match head {
            None => GroupDecision::Incomplete,
            Some(Value::Object(_)) => GroupDecision::Process,
            Some(Value::Start) => GroupDecision::Sync(SyncKind::StartInput),
            Some(Value::End) => GroupDecision::Sync(SyncKind::EndInput),
            Some(Value::Stop) => GroupDecision::Stop,
            Some(Value::Pause) => GroupDecision::Pause,
            Some(Value::Resume(_)) => GroupDecision::Resume,
            Some(Value::Reconfigure(name)) => GroupDecision::Reconfigure(name),
        };
        apply_decision(&self.group, decision, listener)
    }
}
