//! Controller for several connected inputs sharing one group id.

use super::group::SocketGroup;
use super::{apply_decision, FlowState, SyncListener};
use crate::pipeline::error::PipelineResult;

pub struct OneGroupController {
    group: SocketGroup,
}

impl OneGroupController {
    pub(crate) fn new(group: SocketGroup) -> Self {
        Self { group }
    }

    pub(crate) fn group(&self) -> &SocketGroup {
        &self.group
    }

    pub fn prepare_process(
        &mut self,
        stage: &str,
        listener: &dyn SyncListener,
    ) -> PipelineResult<FlowState> {
        let decision = self.group.decide(stage)?;
        apply_decision(&self.group, decision, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::flow::tests::RecordingListener;
    use crate::pipeline::socket::InputSocket;
    use crate::pipeline::value::Value;

    #[test]
    fn test_round_advances_every_input() {
        let mut group = SocketGroup::new(0);
        let left = InputSocket::detached("left", 4);
        let right = InputSocket::detached("right", 4);
        left.enqueue(Value::object(1i64));
        left.enqueue(Value::object(2i64));
        right.enqueue(Value::object(10i64));
        group.inputs.push(left.clone());
        group.inputs.push(right.clone());

        let mut controller = OneGroupController::new(group);
        let listener = RecordingListener::default();
        assert_eq!(
            controller.prepare_process("s", &listener).unwrap(),
            FlowState::Processable
        );
        assert_eq!(left.value().unwrap().downcast_ref::<i64>(), Some(&1));
        assert_eq!(right.value().unwrap().downcast_ref::<i64>(), Some(&10));
        // Right is empty now, so the second object on the left waits.
        assert_eq!(
            controller.prepare_process("s", &listener).unwrap(),
            FlowState::Incomplete
        );
        assert_eq!(left.queue_len(), 1);
    }
}
