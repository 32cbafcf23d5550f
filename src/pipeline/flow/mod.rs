//! Flow control: deciding when a stage may process.
//!
//! A flow controller looks at the heads of a stage's connected inputs and
//! decides, per call, whether one processing round can run, whether a
//! synchronization marker passes through, or whether a stop, pause, resume
//! or reconfiguration tag has reached every input of a group. Callers keep
//! invoking [`FlowController::prepare_process`] until it reports
//! [`FlowState::Incomplete`].
//!
//! Three variants exist, chosen once when a stage is checked:
//!
//! - [`InputOnlyController`] for a stage with a single connected input,
//! - [`OneGroupController`] when every connected input shares one group id,
//! - [`GeneralController`] for several groups.

mod general;
mod group;
mod input_only;
mod mask;
mod one_group;

pub use general::GeneralController;
pub use input_only::InputOnlyController;
pub use mask::TypeMask;
pub use one_group::OneGroupController;

pub(crate) use group::{GroupDecision, SocketGroup};

use crate::pipeline::error::PipelineResult;
use crate::pipeline::socket::{InputSocket, OutputSocket};
use crate::pipeline::value::{ResumeState, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of one `prepare_process` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    /// Nothing can happen until more values arrive.
    Incomplete,
    /// The active group's inputs hold fresh processable values.
    Processable,
    /// A start/end marker passed through.
    Synchronized,
    /// Every input received its stop tag.
    Finished,
    Paused,
    Resumed,
    /// Every input received the reconfiguration tag with this name.
    Reconfigurable(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    StartInput,
    EndInput,
}

impl SyncKind {
    pub fn tag(self) -> Value {
        match self {
            SyncKind::StartInput => Value::Start,
            SyncKind::EndInput => Value::End,
        }
    }
}

/// A synchronization marker consumed from a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEvent {
    pub kind: SyncKind,
    pub group_id: i32,
}

/// Receiver of synchronization events raised by a controller.
pub trait SyncListener {
    fn sync_event(&self, event: SyncEvent) -> PipelineResult<()>;
}

/// Consume a single-group decision: advance inputs and forward markers.
pub(crate) fn apply_decision(
    group: &SocketGroup,
    decision: GroupDecision,
    listener: &dyn SyncListener,
) -> PipelineResult<FlowState> {
    let state = match decision {
        GroupDecision::Incomplete => return Ok(FlowState::Incomplete),
        GroupDecision::Process => FlowState::Processable,
        GroupDecision::Sync(kind) => {
            group.advance_all();
            group.forward(&kind.tag())?;
            listener.sync_event(SyncEvent {
                kind,
                group_id: group.id,
            })?;
            return Ok(FlowState::Synchronized);
        }
        GroupDecision::Stop => FlowState::Finished,
        GroupDecision::Pause => FlowState::Paused,
        GroupDecision::Resume => FlowState::Resumed,
        GroupDecision::Reconfigure(name) => FlowState::Reconfigurable(name),
    };
    group.advance_all();
    Ok(state)
}

pub enum FlowController {
    InputOnly(InputOnlyController),
    OneGroup(OneGroupController),
    General(GeneralController),
}

impl FlowController {
    /// Pick the controller for the currently connected inputs.
    ///
    /// Returns `None` when no input is connected (a producer).
    pub fn build(
        stage: &str,
        inputs: &[Arc<InputSocket>],
        outputs: &[Arc<OutputSocket>],
    ) -> Option<FlowController> {
        let mut groups: BTreeMap<i32, SocketGroup> = BTreeMap::new();
        for input in inputs.iter().filter(|i| i.is_connected()) {
            let id = input.group_id();
            groups
                .entry(id)
                .or_insert_with(|| SocketGroup::new(id))
                .inputs
                .push(input.clone());
        }
        if groups.is_empty() {
            return None;
        }
        for output in outputs {
            if let Some(group) = groups.get_mut(&output.group_id()) {
                group.outputs.push(output.clone());
            }
        }

        let mut groups: Vec<SocketGroup> = groups.into_values().collect();
        let controller = if groups.len() == 1 {
            let group = groups.remove(0);
            // A lone input takes the input-only controller even though the
            // one-group controller would also fit; both decide identically there.
            if group.inputs.len() == 1 {
                FlowController::InputOnly(InputOnlyController::new(group))
            } else {
                FlowController::OneGroup(OneGroupController::new(group))
            }
        } else {
            FlowController::General(GeneralController::new(stage, groups))
        };
        tracing::debug!("{}: using {} flow controller", stage, controller.variant_name());
        Some(controller)
    }

    pub fn prepare_process(
        &mut self,
        stage: &str,
        listener: &dyn SyncListener,
    ) -> PipelineResult<FlowState> {
        match self {
            FlowController::InputOnly(c) => c.prepare_process(stage, listener),
            FlowController::OneGroup(c) => c.prepare_process(stage, listener),
            FlowController::General(c) => c.prepare_process(stage, listener),
        }
    }

    /// Group whose values the last `Processable` result exposed.
    pub fn active_group(&self) -> i32 {
        match self {
            FlowController::InputOnly(c) => c.group().id,
            FlowController::OneGroup(c) => c.group().id,
            FlowController::General(c) => c.active_group(),
        }
    }

    /// Connected inputs of `group`.
    pub fn group_inputs(&self, group: i32) -> Vec<Arc<InputSocket>> {
        self.groups()
            .into_iter()
            .find(|g| g.id == group)
            .map(|g| g.inputs.clone())
            .unwrap_or_default()
    }

    /// Resume counters of the first connected input of `group`, or zero.
    pub fn resume_state(&self, group: i32) -> ResumeState {
        self.group_inputs(group)
            .first()
            .map(|input| input.resume_state())
            .unwrap_or_default()
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            FlowController::InputOnly(_) => "input-only",
            FlowController::OneGroup(_) => "one-group",
            FlowController::General(_) => "general",
        }
    }

    fn groups(&self) -> Vec<&SocketGroup> {
        match self {
            FlowController::InputOnly(c) => vec![c.group()],
            FlowController::OneGroup(c) => vec![c.group()],
            FlowController::General(c) => c.groups().iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::value::ValueKind;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    #[derive(Default)]
    pub(crate) struct RecordingListener {
        pub events: Mutex<Vec<SyncEvent>>,
    }

    impl SyncListener for RecordingListener {
        fn sync_event(&self, event: SyncEvent) -> PipelineResult<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    fn connected_input(name: &str, group: i32, upstream: &Arc<OutputSocket>) -> Arc<InputSocket> {
        let input = InputSocket::detached(name, 8);
        input.set_group_id(group);
        upstream.connect(&input);
        input
    }

    #[test]
    fn test_controller_selection() {
        let up = OutputSocket::new("up");
        let lone = InputSocket::new("lone");
        assert!(FlowController::build("s", &[lone.clone()], &[]).is_none());

        let a = connected_input("a", 0, &up);
        let c = FlowController::build("s", &[a.clone(), lone.clone()], &[]).unwrap();
        assert_eq!(c.variant_name(), "input-only");

        let b = connected_input("b", 0, &up);
        let c = FlowController::build("s", &[a.clone(), b.clone()], &[]).unwrap();
        assert_eq!(c.variant_name(), "one-group");

        b.set_group_id(1);
        let c = FlowController::build("s", &[a, b], &[]).unwrap();
        assert_eq!(c.variant_name(), "general");
    }

    #[test]
    fn test_sync_marker_forwarded_to_same_group_outputs() {
        let up = OutputSocket::new("up");
        let input = connected_input("in", 3, &up);
        let same = OutputSocket::new("same");
        same.set_group_id(3);
        let other = OutputSocket::new("other");
        let same_sink = InputSocket::detached("s", 4);
        let other_sink = InputSocket::detached("o", 4);
        same.connect(&same_sink);
        other.connect(&other_sink);

        let mut controller =
            FlowController::build("s", &[input.clone()], &[same.clone(), other.clone()]).unwrap();
        let listener = RecordingListener::default();
        input.enqueue(Value::Start);

        let state = controller.prepare_process("s", &listener).unwrap();
        assert_eq!(state, FlowState::Synchronized);
        assert_eq!(same_sink.head_kind(), Some(ValueKind::Start));
        assert_eq!(other_sink.queue_len(), 0);
        assert_eq!(
            listener.events.lock().as_slice(),
            &[SyncEvent {
                kind: SyncKind::StartInput,
                group_id: 3
            }]
        );
        assert_eq!(
            controller.prepare_process("s", &listener).unwrap(),
            FlowState::Incomplete
        );
    }

    #[test]
    fn test_resume_state_taken_from_group_input() {
        let up = OutputSocket::new("up");
        let input = connected_input("in", 0, &up);
        let mut controller = FlowController::build("s", &[input.clone()], &[]).unwrap();
        input.enqueue(Value::Resume(ResumeState::new(2, 1)));
        let listener = RecordingListener::default();
        assert_eq!(
            controller.prepare_process("s", &listener).unwrap(),
            FlowState::Resumed
        );
        assert_eq!(controller.resume_state(0), ResumeState::new(2, 1));
        assert_eq!(controller.resume_state(7), ResumeState::default());
    }

    fn head_strategy() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            Just(None),
            Just(Some(Value::object(0i64))),
            Just(Some(Value::Start)),
            Just(Some(Value::End)),
            Just(Some(Value::Stop)),
            Just(Some(Value::Pause)),
            Just(Some(Value::Resume(ResumeState::default()))),
            Just(Some(Value::reconfigure("a"))),
            Just(Some(Value::reconfigure("b"))),
        ]
    }

    proptest! {
        // Every head combination yields a single decision or a
        // synchronization error, and only a decision consumes values.
        #[test]
        fn prop_tag_mask_completeness(heads in proptest::collection::vec(head_strategy(), 2..5)) {
            let up = OutputSocket::new("up");
            let mut inputs = Vec::new();
            let mut queued = 0;
            for (i, head) in heads.iter().enumerate() {
                let input = connected_input(&format!("in{}", i), 0, &up);
                if let Some(value) = head {
                    input.enqueue(value.clone());
                    queued += 1;
                }
                inputs.push(input);
            }
            let mut controller = FlowController::build("s", &inputs, &[]).unwrap();
            let listener = RecordingListener::default();
            let remaining = |inputs: &[Arc<InputSocket>]| inputs.iter().map(|i| i.queue_len()).sum::<usize>();

            match controller.prepare_process("s", &listener) {
                Ok(FlowState::Incomplete) => prop_assert_eq!(remaining(&inputs), queued),
                Ok(_) => {
                    prop_assert!(heads.iter().all(Option::is_some));
                    prop_assert_eq!(remaining(&inputs), 0);
                }
                Err(err) => {
                    let is_sync = matches!(err, crate::pipeline::error::PipelineError::Synchronization { .. });
                    prop_assert!(is_sync);
                    prop_assert_eq!(remaining(&inputs), queued);
                }
            }
        }
    }
}
