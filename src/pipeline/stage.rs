//! Stage abstraction: what a processing step implements.
//!
//! Two-layer design, as for the runtime nodes:
//! - **`Stage` trait**: implemented by every stage class, built-in or not.
//! - **`BuiltinStage` enum**: the stages shipped with the crate, dispatched
//!   by `match` so the hot path avoids a vtable.
//!
//! `AnyStage` wraps either variant so the runtime can handle both uniformly.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::flow::SyncEvent;
use crate::pipeline::id::NodeId;
use crate::pipeline::property::{Configurable, PropertyValue};
use crate::pipeline::socket::{InputSocket, OutputSocket, SocketDescriptor};
use crate::pipeline::stages::{Collector, CounterSource, Passthrough, Repeater, Scale};
use crate::pipeline::value::Value;
use std::any::Any;
use std::sync::Arc;

/// How a processing round ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Ready for the next round.
    Continue,
    /// The stage has nothing more to produce; stop tags follow.
    Finished,
    /// The stage asks to pause; pause tags follow.
    Paused,
    /// A blocking send was cancelled.
    Interrupted,
    Error(PipelineError),
}

impl ProcessOutcome {
    /// Fold a stage's `process` result into an outcome.
    pub fn from_result(result: PipelineResult<ProcessOutcome>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(PipelineError::Interrupted) => ProcessOutcome::Interrupted,
            Err(e) => ProcessOutcome::Error(e),
        }
    }
}

/// View of a stage's sockets handed to `check`, `process` and `sync_event`.
pub struct StageContext<'a> {
    name: &'a str,
    node_id: NodeId,
    inputs: &'a [Arc<InputSocket>],
    outputs: &'a [Arc<OutputSocket>],
    active_group: i32,
    round: u64,
}

impl<'a> StageContext<'a> {
    pub fn new(
        name: &'a str,
        node_id: NodeId,
        inputs: &'a [Arc<InputSocket>],
        outputs: &'a [Arc<OutputSocket>],
        active_group: i32,
    ) -> Self {
        Self {
            name,
            node_id,
            inputs,
            outputs,
            active_group,
            round: 0,
        }
    }

    pub fn with_round(mut self, round: u64) -> Self {
        self.round = round;
        self
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Group whose inputs hold this round's values.
    pub fn active_group(&self) -> i32 {
        self.active_group
    }

    /// Sequence number of this round since the last resetting check.
    ///
    /// Numbers follow dispatch order, which is also the order in which the
    /// outputs release what the round emits, even when pool workers finish
    /// out of order.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|i| i.name() == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name() == name)
    }

    pub fn input(&self, index: usize) -> PipelineResult<&Arc<InputSocket>> {
        self.inputs
            .get(index)
            .ok_or_else(|| PipelineError::UnknownSocket(format!("{}.input[{}]", self.name, index)))
    }

    pub fn output(&self, index: usize) -> PipelineResult<&Arc<OutputSocket>> {
        self.outputs
            .get(index)
            .ok_or_else(|| PipelineError::UnknownSocket(format!("{}.output[{}]", self.name, index)))
    }

    /// Processable value of input `index` for the calling thread.
    pub fn value(&self, index: usize) -> PipelineResult<Value> {
        let input = self.input(index)?;
        input
            .value()
            .ok_or_else(|| PipelineError::MissingValue(input.name().to_string()))
    }

    /// Typed access to the processable object of input `index`.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> PipelineResult<Arc<T>> {
        let value = self.value(index)?;
        let found = match &value {
            Value::Object(obj) => {
                if let Some(typed) = obj.downcast::<T>() {
                    return Ok(typed);
                }
                obj.type_name().to_string()
            }
            tag => format!("{:?}", tag),
        };
        Err(PipelineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found,
        })
    }

    pub fn send(&self, index: usize, value: Value) -> PipelineResult<()> {
        self.output(index)?.send(value)
    }

    /// Wrap `value` in an object and send it.
    pub fn emit<T: Any + Send + Sync>(&self, index: usize, value: T) -> PipelineResult<()> {
        self.send(index, Value::object(value))
    }

    pub fn start_many(&self, index: usize) -> PipelineResult<()> {
        self.output(index)?.start_many()
    }

    pub fn end_many(&self, index: usize) -> PipelineResult<()> {
        self.output(index)?.end_many()
    }

    pub fn start_delay(&self, index: usize) -> PipelineResult<()> {
        self.output(index)?.start_delay();
        Ok(())
    }

    pub fn end_delay(&self, index: usize) -> PipelineResult<()> {
        self.output(index)?.end_delay();
        Ok(())
    }

    /// Processing error attributed to this stage.
    pub fn error(&self, message: impl std::fmt::Display) -> PipelineError {
        PipelineError::processing(self.name, self.node_id, message)
    }
}

/// A processing step.
///
/// `process` takes `&self`: under a worker pool several rounds run at once,
/// so mutable state lives behind interior mutability.
pub trait Stage: Configurable + Send + Sync {
    /// Registry name of the stage class.
    fn class_name(&self) -> &'static str;

    /// Sockets created for every instance of this class.
    fn sockets(&self) -> &[SocketDescriptor];

    /// Validate the configuration; clear internal buffers when `reset`.
    fn check(&self, _ctx: &StageContext, _reset: bool) -> PipelineResult<()> {
        Ok(())
    }

    /// Consume the processable values and optionally send results.
    ///
    /// Stages without connected inputs are producers: they are called in a
    /// loop until they return something other than `Continue`.
    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome>;

    /// A start/end marker passed through the input group `event.group_id`.
    fn sync_event(&self, _event: SyncEvent, _ctx: &StageContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// Enum dispatch for built-in stages.
pub enum BuiltinStage {
    CounterSource(CounterSource),
    Passthrough(Passthrough),
    Scale(Scale),
    Repeater(Repeater),
    Collector(Collector),
}

impl BuiltinStage {
    fn as_stage(&self) -> &dyn Stage {
        match self {
            BuiltinStage::CounterSource(s) => s,
            BuiltinStage::Passthrough(s) => s,
            BuiltinStage::Scale(s) => s,
            BuiltinStage::Repeater(s) => s,
            BuiltinStage::Collector(s) => s,
        }
    }

    pub fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        match self {
            BuiltinStage::CounterSource(s) => s.process(ctx),
            BuiltinStage::Passthrough(s) => s.process(ctx),
            BuiltinStage::Scale(s) => s.process(ctx),
            BuiltinStage::Repeater(s) => s.process(ctx),
            BuiltinStage::Collector(s) => s.process(ctx),
        }
    }
}

/// Either a built-in stage or a user-provided one.
pub enum AnyStage {
    Builtin(BuiltinStage),
    Plugin(Box<dyn Stage>),
}

impl AnyStage {
    pub fn plugin(stage: impl Stage + 'static) -> Self {
        AnyStage::Plugin(Box::new(stage))
    }

    fn as_stage(&self) -> &dyn Stage {
        match self {
            AnyStage::Builtin(s) => s.as_stage(),
            AnyStage::Plugin(s) => s.as_ref(),
        }
    }

    pub fn class_name(&self) -> &'static str {
        self.as_stage().class_name()
    }

    pub fn sockets(&self) -> &[SocketDescriptor] {
        self.as_stage().sockets()
    }

    pub fn check(&self, ctx: &StageContext, reset: bool) -> PipelineResult<()> {
        self.as_stage().check(ctx, reset)
    }

    pub fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        match self {
            AnyStage::Builtin(s) => s.process(ctx),
            AnyStage::Plugin(s) => s.process(ctx),
        }
    }

    pub fn sync_event(&self, event: SyncEvent, ctx: &StageContext) -> PipelineResult<()> {
        self.as_stage().sync_event(event, ctx)
    }

    /// Access the built-in collector, if this is one.
    pub fn as_collector(&self) -> Option<&Collector> {
        match self {
            AnyStage::Builtin(BuiltinStage::Collector(c)) => Some(c),
            _ => None,
        }
    }
}

impl Configurable for AnyStage {
    fn property(&self, name: &str) -> Option<PropertyValue> {
        self.as_stage().property(name)
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
        self.as_stage().set_property(name, value)
    }

    fn property_names(&self) -> &[&'static str] {
        self.as_stage().property_names()
    }
}

impl From<BuiltinStage> for AnyStage {
    fn from(stage: BuiltinStage) -> Self {
        AnyStage::Builtin(stage)
    }
}

impl From<Box<dyn Stage>> for AnyStage {
    fn from(stage: Box<dyn Stage>) -> Self {
        AnyStage::Plugin(stage)
    }
}
