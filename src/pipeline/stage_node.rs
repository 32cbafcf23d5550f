//! Runtime node wrapping one stage.
//!
//! # State machine
//!
//! ```text
//! Stopped ─start─► Starting ──► Running ─pause─► Pausing ──► Paused
//!    ▲                 │           │                            │
//!    │                 └─stop──────┴─► Stopping ──► Stopped     start
//!    └── Interrupted ◄── interrupt (any state)                  ▼
//!                                                            Starting
//! ```
//!
//! Producers (no connected input) reach `Running` as soon as they start and
//! leave it when a pause/stop request is seen between rounds. Consumers
//! reach `Running` on their first flow decision and finish when stop or
//! pause tags reach every input.
//!
//! # Locking
//!
//! The reentrant transition lock guards state decisions and listener
//! notifications only. Sends never happen while it is held.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::flow::{FlowController, FlowState, SyncEvent, SyncListener};
use crate::pipeline::id::{NodeId, SocketId};
use crate::pipeline::node::{Node, ProcessingMode};
use crate::pipeline::processor::{PoolProcessor, Processor, Rounds, RunEnd};
use crate::pipeline::property::{apply_property_set, Configurable, PropertySet, PropertyValue};
use crate::pipeline::socket::{InputController, InputSocket, OutputSocket};
use crate::pipeline::stage::{AnyStage, ProcessOutcome, StageContext};
use crate::pipeline::state::{ErrorReport, Listeners, StageListener, StageState, StateCell};
use crate::pipeline::value::{ResumeState, Value};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlRequest {
    Pause,
    Stop,
}

/// A stage instance: sockets, state machine, flow controller and processor.
pub struct StageNode {
    inner: Arc<StageInner>,
}

pub(crate) struct StageInner {
    id: NodeId,
    name: String,
    this: Weak<StageInner>,
    stage: AnyStage,
    mode: ProcessingMode,
    inputs: Vec<Arc<InputSocket>>,
    outputs: Vec<Arc<OutputSocket>>,
    transition: ReentrantMutex<()>,
    state: StateCell,
    flow: Mutex<Option<FlowController>>,
    processor: Processor,
    listeners: Listeners,
    interrupted: AtomicBool,
    checked: AtomicBool,
    producer: AtomicBool,
    /// A producer restarted from `Paused` owes its outputs resume tags.
    resuming: AtomicBool,
    /// Rounds dispatched since the last resetting check.
    rounds: AtomicU64,
    property_sets: Mutex<HashMap<String, PropertySet>>,
    pending_reconfigure: Mutex<VecDeque<String>>,
    control: Mutex<Option<ControlRequest>>,
}

impl StageNode {
    pub fn new(
        name: impl Into<String>,
        stage: impl Into<AnyStage>,
        mode: ProcessingMode,
    ) -> Arc<StageNode> {
        let name = name.into();
        let stage = stage.into();
        let id = NodeId::next();
        let inner = Arc::new_cyclic(|this: &Weak<StageInner>| {
            let controller: Weak<dyn InputController> = this.clone();
            let mut inputs = Vec::new();
            let mut outputs = Vec::new();
            for descriptor in stage.sockets() {
                if descriptor.is_input() {
                    let socket_id = SocketId::new(id, inputs.len() as u16);
                    inputs.push(Arc::new(InputSocket::owned(
                        socket_id,
                        descriptor,
                        controller.clone(),
                    )));
                } else {
                    let socket_id = SocketId::new(id, outputs.len() as u16);
                    outputs.push(Arc::new(OutputSocket::owned(socket_id, descriptor)));
                }
            }
            StageInner {
                id,
                name,
                this: this.clone(),
                stage,
                mode,
                inputs,
                outputs,
                transition: ReentrantMutex::new(()),
                state: StateCell::new(),
                flow: Mutex::new(None),
                processor: Processor::new(mode),
                listeners: Listeners::default(),
                interrupted: AtomicBool::new(false),
                checked: AtomicBool::new(false),
                producer: AtomicBool::new(false),
                resuming: AtomicBool::new(false),
                rounds: AtomicU64::new(0),
                property_sets: Mutex::new(HashMap::new()),
                pending_reconfigure: Mutex::new(VecDeque::new()),
                control: Mutex::new(None),
            }
        });
        tracing::debug!(
            "Created stage '{}' ({}) of class {} [{}]",
            inner.name,
            inner.id,
            inner.stage.class_name(),
            mode
        );
        Arc::new(StageNode { inner })
    }

    pub fn mode(&self) -> ProcessingMode {
        self.inner.mode
    }

    pub fn class_name(&self) -> &'static str {
        self.inner.stage.class_name()
    }

    pub fn stage(&self) -> &AnyStage {
        &self.inner.stage
    }

    pub fn inputs(&self) -> &[Arc<InputSocket>] {
        &self.inner.inputs
    }

    pub fn outputs(&self) -> &[Arc<OutputSocket>] {
        &self.inner.outputs
    }

    /// Change the queue capacity of input `input`. Only while stopped.
    pub fn set_queue_capacity(&self, input: &str, capacity: usize) -> PipelineResult<()> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("set queue capacity")?;
        self.inner
            .find_input(input)
            .ok_or_else(|| PipelineError::UnknownSocket(format!("{}.{}", self.inner.name, input)))?
            .set_capacity(capacity)
    }

    /// Move the socket named `socket` (input or output) to `group`. Only while stopped.
    pub fn set_group_id(&self, socket: &str, group: i32) -> PipelineResult<()> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("set group id")?;
        if let Some(input) = self.inner.find_input(socket) {
            input.set_group_id(group);
        } else if let Some(output) = self.inner.find_output(socket) {
            output.set_group_id(group);
        } else {
            return Err(PipelineError::UnknownSocket(format!("{}.{}", self.inner.name, socket)));
        }
        self.inner.checked.store(false, Ordering::Release);
        Ok(())
    }

    pub fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
        self.inner.stage.set_property(name, value)
    }

    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.inner.stage.property(name)
    }

    /// Remember `set` under `name` for a later `reconfigure`.
    pub fn cache_property_set(&self, name: impl Into<String>, set: PropertySet) {
        self.inner.property_sets.lock().insert(name.into(), set);
    }
}

impl Node for StageNode {
    fn id(&self) -> NodeId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> StageState {
        self.inner.state.get()
    }

    fn check(&self, reset: bool) -> PipelineResult<()> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("check")?;
        self.inner.check_locked(reset)
    }

    fn start(&self) -> PipelineResult<()> {
        self.inner.start()
    }

    fn pause(&self) -> PipelineResult<()> {
        self.inner.pause()
    }

    fn stop(&self) -> PipelineResult<()> {
        self.inner.stop()
    }

    fn interrupt(&self) {
        self.inner.interrupt()
    }

    fn reconfigure(&self, set: &str) -> PipelineResult<()> {
        self.inner.reconfigure(set)
    }

    fn add_listener(&self, listener: Arc<dyn StageListener>) {
        self.inner.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn StageListener>) {
        self.inner.listeners.remove(listener);
    }

    fn input(&self, name: &str) -> Option<Arc<InputSocket>> {
        self.inner.find_input(name).cloned()
    }

    fn output(&self, name: &str) -> Option<Arc<OutputSocket>> {
        self.inner.find_output(name).cloned()
    }

    fn input_names(&self) -> Vec<String> {
        self.inner.inputs.iter().map(|i| i.name().to_string()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.inner.outputs.iter().map(|o| o.name().to_string()).collect()
    }

    fn detach(&self) {
        self.inner.detach();
    }

    fn wait_for(&self, state: StageState, timeout: Duration) -> bool {
        self.inner.state.wait_for(state, timeout)
    }
}

impl Drop for StageNode {
    fn drop(&mut self) {
        self.inner.interrupt();
        self.inner.detach();
    }
}

impl std::fmt::Debug for StageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageNode")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("class", &self.inner.stage.class_name())
            .field("mode", &self.inner.mode)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl StageInner {
    // ── Accessors used by the processors ──

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weak(&self) -> Weak<StageInner> {
        self.this.clone()
    }

    pub fn outputs(&self) -> &[Arc<OutputSocket>] {
        &self.outputs
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn is_producer(&self) -> bool {
        self.producer.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> Option<&PoolProcessor> {
        match &self.processor {
            Processor::Pool(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn group_inputs(&self, group: i32) -> Vec<Arc<InputSocket>> {
        self.flow
            .lock()
            .as_ref()
            .map(|flow| flow.group_inputs(group))
            .unwrap_or_default()
    }

    fn find_input(&self, name: &str) -> Option<&Arc<InputSocket>> {
        self.inputs.iter().find(|i| i.name() == name)
    }

    fn find_output(&self, name: &str) -> Option<&Arc<OutputSocket>> {
        self.outputs.iter().find(|o| o.name() == name)
    }

    fn context(&self, group: i32) -> StageContext<'_> {
        StageContext::new(&self.name, self.id, &self.inputs, &self.outputs, group)
    }

    /// Claim the sequence number of the next round, in dispatch order.
    pub fn next_round(&self) -> u64 {
        self.rounds.fetch_add(1, Ordering::AcqRel)
    }

    // ── State transitions ──

    /// Must be called with the transition lock held.
    fn set_state(&self, state: StageState) {
        let previous = self.state.set(state);
        if previous != state {
            tracing::debug!("Stage '{}' ({}): {:?} -> {:?}", self.name, self.id, previous, state);
            self.listeners.state_changed(self.id, &self.name, state);
        }
    }

    fn require_stopped(&self, action: &'static str) -> PipelineResult<()> {
        match self.state.get() {
            StageState::Stopped => Ok(()),
            state => Err(PipelineError::InvalidState { action, state }),
        }
    }

    fn check_locked(&self, reset: bool) -> PipelineResult<()> {
        for input in &self.inputs {
            if !input.is_optional() && !input.is_connected() {
                return Err(PipelineError::UnconnectedInput {
                    stage: self.name.clone(),
                    socket: input.name().to_string(),
                });
            }
        }
        if reset {
            for input in &self.inputs {
                input.reset();
            }
            self.rounds.store(0, Ordering::Release);
        }
        self.stage.check(&self.context(0), reset)?;

        let flow = FlowController::build(&self.name, &self.inputs, &self.outputs);
        if flow.is_none() && self.mode == ProcessingMode::Inline {
            return Err(PipelineError::InvalidConnection(format!(
                "inline stage '{}' has no connected input to run on",
                self.name
            )));
        }
        self.producer.store(flow.is_none(), Ordering::Release);
        let pooled = matches!(self.mode, ProcessingMode::Pool { .. });
        for input in &self.inputs {
            input.set_thread_indexed(pooled);
        }
        for output in &self.outputs {
            output.set_ordered(pooled);
        }
        *self.flow.lock() = flow;
        self.checked.store(true, Ordering::Release);
        Ok(())
    }

    fn start(&self) -> PipelineResult<()> {
        {
            let _guard = self.transition.lock();
            let state = self.state.get();
            if !matches!(state, StageState::Stopped | StageState::Paused) {
                return Err(PipelineError::InvalidState {
                    action: "start",
                    state,
                });
            }
            if state == StageState::Stopped {
                if !self.checked.load(Ordering::Acquire) {
                    self.check_locked(true)?;
                }
                self.interrupted.store(false, Ordering::SeqCst);
                for output in &self.outputs {
                    output.reset();
                }
                *self.control.lock() = None;
                self.pending_reconfigure.lock().clear();
            }
            let producer = self.is_producer();
            self.resuming
                .store(producer && state == StageState::Paused, Ordering::Release);
            self.processor.prepare_start(self);
            self.set_state(StageState::Starting);
            if producer {
                self.set_state(StageState::Running);
            }
        }
        self.processor.kick(self);
        Ok(())
    }

    fn pause(&self) -> PipelineResult<()> {
        let _guard = self.transition.lock();
        let state = self.state.get();
        if state != StageState::Running {
            return Err(PipelineError::InvalidState {
                action: "pause",
                state,
            });
        }
        self.set_state(StageState::Pausing);
        if self.is_producer() {
            *self.control.lock() = Some(ControlRequest::Pause);
        }
        Ok(())
    }

    fn stop(&self) -> PipelineResult<()> {
        let _guard = self.transition.lock();
        let state = self.state.get();
        if !matches!(state, StageState::Running | StageState::Starting) {
            return Err(PipelineError::InvalidState {
                action: "stop",
                state,
            });
        }
        self.set_state(StageState::Stopping);
        if self.is_producer() {
            *self.control.lock() = Some(ControlRequest::Stop);
        }
        Ok(())
    }

    pub fn interrupt(&self) {
        if self.state.get() == StageState::Stopped {
            return;
        }
        self.interrupted.store(true, Ordering::SeqCst);
        for output in &self.outputs {
            output.interrupt();
        }
        {
            let _guard = self.transition.lock();
            match self.state.get() {
                StageState::Stopped | StageState::Interrupted => return,
                _ => self.set_state(StageState::Interrupted),
            }
        }
        tracing::debug!("Stage '{}' ({}) interrupted", self.name, self.id);
        self.processor.on_interrupt(self);
    }

    /// `Interrupted -> Stopped`, once no thread works for the stage.
    pub fn finish_interrupt(&self) {
        let _guard = self.transition.lock();
        if self.state.get() == StageState::Interrupted {
            self.set_state(StageState::Stopped);
            self.checked.store(false, Ordering::Release);
        }
    }

    fn mark_running(&self) {
        if self.state.get() != StageState::Starting {
            return;
        }
        let _guard = self.transition.lock();
        if self.state.get() == StageState::Starting {
            self.set_state(StageState::Running);
        }
    }

    /// Forward stop tags and settle in `Stopped`.
    fn finalize_stop(&self) {
        {
            let _guard = self.transition.lock();
            match self.state.get() {
                StageState::Starting => {
                    self.set_state(StageState::Running);
                    self.set_state(StageState::Stopping);
                }
                StageState::Running | StageState::Pausing => self.set_state(StageState::Stopping),
                StageState::Stopping => {}
                _ => return,
            }
        }
        for output in &self.outputs {
            if let Err(e) = output.stop() {
                self.abort(e);
                return;
            }
        }
        let _guard = self.transition.lock();
        if self.state.get() == StageState::Stopping {
            self.set_state(StageState::Stopped);
            self.checked.store(false, Ordering::Release);
        }
    }

    /// Forward pause tags and settle in `Paused`.
    fn finalize_pause(&self) {
        {
            let _guard = self.transition.lock();
            match self.state.get() {
                StageState::Starting => {
                    self.set_state(StageState::Running);
                    self.set_state(StageState::Pausing);
                }
                StageState::Running => self.set_state(StageState::Pausing),
                StageState::Pausing => {}
                _ => return,
            }
        }
        for output in &self.outputs {
            if let Err(e) = output.pause() {
                self.abort(e);
                return;
            }
        }
        let _guard = self.transition.lock();
        if self.state.get() == StageState::Pausing {
            self.set_state(StageState::Paused);
        }
    }

    pub fn finish_drain(&self, end: RunEnd) {
        match end {
            RunEnd::Idle => {}
            RunEnd::Finished => self.finalize_stop(),
            RunEnd::Paused => self.finalize_pause(),
            RunEnd::Interrupted => self.finish_interrupt(),
        }
    }

    /// Report `error` upward and interrupt the stage.
    pub fn fail(&self, error: PipelineError) {
        tracing::error!("Stage '{}' ({}) failed: {}", self.name, self.id, error);
        let report = ErrorReport::new(self.id, &self.name, error);
        self.listeners.error_occurred(&report);
        self.interrupt();
    }

    /// Cancellation ends quietly; anything else is reported first.
    fn abort(&self, error: PipelineError) {
        if !error.is_interrupted() {
            self.fail(error);
        }
        self.finish_interrupt();
    }

    fn error_end(&self, error: PipelineError) -> RunEnd {
        if !error.is_interrupted() {
            self.fail(error);
        }
        RunEnd::Interrupted
    }

    // ── Processing ──

    pub fn process_round(&self, group: i32, round: u64) -> ProcessOutcome {
        let ctx = self.context(group).with_round(round);
        ProcessOutcome::from_result(self.stage.process(&ctx))
    }

    /// Ask the flow controller for work until it reports nothing to do.
    pub fn drain(&self, rounds: &dyn Rounds) -> RunEnd {
        match self.drain_flow(rounds) {
            Ok(end) => end,
            Err(e) => self.error_end(e),
        }
    }

    fn drain_flow(&self, rounds: &dyn Rounds) -> PipelineResult<RunEnd> {
        loop {
            if self.is_interrupted() {
                return Ok(RunEnd::Interrupted);
            }
            if !self.state.get().is_active() {
                return Ok(RunEnd::Idle);
            }
            let (flow_state, group, resume) = {
                let mut flow = self.flow.lock();
                let Some(controller) = flow.as_mut() else {
                    return Ok(RunEnd::Idle);
                };
                let flow_state = controller.prepare_process(&self.name, self)?;
                let resume: Vec<ResumeState> = if flow_state == FlowState::Resumed {
                    self.outputs
                        .iter()
                        .map(|o| controller.resume_state(o.group_id()))
                        .collect()
                } else {
                    Vec::new()
                };
                (flow_state, controller.active_group(), resume)
            };

            match flow_state {
                FlowState::Incomplete => return Ok(RunEnd::Idle),
                FlowState::Processable => {
                    self.mark_running();
                    match rounds.run(self, group) {
                        ProcessOutcome::Continue => {}
                        ProcessOutcome::Finished => return Ok(RunEnd::Finished),
                        ProcessOutcome::Paused => return Ok(RunEnd::Paused),
                        ProcessOutcome::Interrupted => return Ok(RunEnd::Interrupted),
                        ProcessOutcome::Error(e) => return Err(e),
                    }
                }
                FlowState::Synchronized => self.mark_running(),
                FlowState::Finished => return Ok(RunEnd::Finished),
                FlowState::Paused => return Ok(RunEnd::Paused),
                FlowState::Resumed => {
                    self.mark_running();
                    for (output, state) in self.outputs.iter().zip(resume) {
                        output.resume(state)?;
                    }
                }
                FlowState::Reconfigurable(name) => {
                    self.mark_running();
                    rounds.quiesce(self);
                    self.apply_cached(&name, false)?;
                    self.forward_reconfigure(&name)?;
                }
            }
        }
    }

    /// Free-running loop of a stage without connected inputs.
    pub fn run_producer(&self, rounds: &dyn Rounds) -> RunEnd {
        if self.resuming.swap(false, Ordering::AcqRel) {
            for output in &self.outputs {
                if let Err(e) = output.resume(ResumeState::default()) {
                    return self.error_end(e);
                }
            }
        }
        loop {
            if self.is_interrupted() {
                return RunEnd::Interrupted;
            }
            if !self.state.get().is_active() {
                return RunEnd::Idle;
            }
            let request = self.control.lock().take();
            if let Some(request) = request {
                rounds.quiesce(self);
                return match request {
                    ControlRequest::Pause => RunEnd::Paused,
                    ControlRequest::Stop => RunEnd::Finished,
                };
            }
            let pending = self.pending_reconfigure.lock().pop_front();
            if let Some(set) = pending {
                rounds.quiesce(self);
                let applied = self
                    .apply_cached(&set, true)
                    .and_then(|_| self.forward_reconfigure(&set));
                if let Err(e) = applied {
                    return self.error_end(e);
                }
            }
            match rounds.run(self, 0) {
                ProcessOutcome::Continue => {}
                ProcessOutcome::Finished => return RunEnd::Finished,
                ProcessOutcome::Paused => return RunEnd::Paused,
                ProcessOutcome::Interrupted => return RunEnd::Interrupted,
                ProcessOutcome::Error(e) => return self.error_end(e),
            }
        }
    }

    // ── Reconfiguration ──

    fn reconfigure(&self, set: &str) -> PipelineResult<()> {
        let _guard = self.transition.lock();
        if !self.property_sets.lock().contains_key(set) {
            return Err(PipelineError::UnknownPropertySet(set.to_string()));
        }
        match self.state.get() {
            StageState::Stopped | StageState::Paused => self.apply_cached(set, true),
            state if state.is_active() && self.is_producer() => {
                self.pending_reconfigure.lock().push_back(set.to_string());
                Ok(())
            }
            state => {
                tracing::debug!(
                    "Stage '{}' ({:?}): property set '{}' follows the reconfiguration tag",
                    self.name,
                    state,
                    set
                );
                Ok(())
            }
        }
    }

    fn apply_cached(&self, set: &str, required: bool) -> PipelineResult<()> {
        let cached = self.property_sets.lock().get(set).cloned();
        match cached {
            Some(properties) => {
                tracing::debug!("Stage '{}': applying property set '{}'", self.name, set);
                apply_property_set(&self.stage, &properties)
            }
            None if required => Err(PipelineError::UnknownPropertySet(set.to_string())),
            None => {
                tracing::debug!("Stage '{}': no property set '{}', skipped", self.name, set);
                Ok(())
            }
        }
    }

    fn forward_reconfigure(&self, set: &str) -> PipelineResult<()> {
        for output in &self.outputs {
            output.send(Value::reconfigure(set))?;
        }
        Ok(())
    }

    fn detach(&self) {
        for input in &self.inputs {
            input.disconnect();
        }
        for output in &self.outputs {
            output.disconnect(None);
        }
    }
}

impl InputController for StageInner {
    fn try_to_receive(&self, input: &InputSocket, value: Value) -> PipelineResult<bool> {
        if !input.enqueue(value) {
            return Ok(false);
        }
        if self.state.get().is_active() {
            self.processor.value_received(self);
        }
        Ok(true)
    }
}

impl SyncListener for StageInner {
    fn sync_event(&self, event: SyncEvent) -> PipelineResult<()> {
        self.stage.sync_event(event, &self.context(event.group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::{Collector, CounterSource, Passthrough};
    use crate::pipeline::stage::BuiltinStage;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn passthrough(name: &str, mode: ProcessingMode) -> Arc<StageNode> {
        StageNode::new(name, BuiltinStage::Passthrough(Passthrough::new()), mode)
    }

    #[test]
    fn test_sockets_built_from_descriptors() {
        let node = passthrough("p", ProcessingMode::Inline);
        assert_eq!(node.input_names(), vec!["in"]);
        assert_eq!(node.output_names(), vec!["out"]);
        let input = node.input("in").unwrap();
        assert_eq!(input.id().node(), node.id());
        assert_eq!(input.capacity(), crate::pipeline::socket::DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_check_reports_unconnected_input() {
        let node = passthrough("p", ProcessingMode::Threaded);
        match node.check(false) {
            Err(PipelineError::UnconnectedInput { stage, socket }) => {
                assert_eq!(stage, "p");
                assert_eq!(socket, "in");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(node.start().is_err());
        assert_eq!(node.state(), StageState::Stopped);
    }

    #[test]
    fn test_control_calls_validate_state() {
        let node = passthrough("p", ProcessingMode::Inline);
        assert!(matches!(
            node.pause(),
            Err(PipelineError::InvalidState { action: "pause", state: StageState::Stopped })
        ));
        assert!(matches!(
            node.stop(),
            Err(PipelineError::InvalidState { action: "stop", .. })
        ));
        // Interrupting a stopped stage does nothing.
        node.interrupt();
        assert_eq!(node.state(), StageState::Stopped);
    }

    #[test]
    fn test_capacity_only_changes_while_stopped() {
        let node = passthrough("p", ProcessingMode::Inline);
        let upstream = OutputSocket::new("up");
        upstream.connect(&node.input("in").unwrap());
        node.set_queue_capacity("in", 5).unwrap();
        assert_eq!(node.input("in").unwrap().capacity(), 5);
        assert!(matches!(
            node.set_queue_capacity("in", 0),
            Err(PipelineError::InvalidCapacity(0))
        ));
        assert!(node.set_queue_capacity("nope", 1).is_err());

        node.start().unwrap();
        assert!(matches!(
            node.set_queue_capacity("in", 3),
            Err(PipelineError::InvalidState { .. })
        ));
        node.interrupt();
        assert!(node.wait_for(StageState::Stopped, TIMEOUT));
    }

    #[test]
    fn test_inline_consumer_runs_on_sender_thread() {
        let node = passthrough("p", ProcessingMode::Inline);
        let upstream = OutputSocket::new("up");
        let sink = InputSocket::detached("sink", 8);
        upstream.connect(&node.input("in").unwrap());
        node.output("out").unwrap().connect(&sink);

        node.start().unwrap();
        assert_eq!(node.state(), StageState::Starting);
        upstream.send(Value::object(1i64)).unwrap();
        assert_eq!(node.state(), StageState::Running);
        assert_eq!(sink.queue_len(), 1);

        node.stop().unwrap();
        upstream.send(Value::Stop).unwrap();
        assert_eq!(node.state(), StageState::Stopped);
        let kinds: Vec<_> = sink.queued().iter().map(Value::kind).collect();
        assert_eq!(kinds, vec![crate::pipeline::value::ValueKind::Object, crate::pipeline::value::ValueKind::Stop]);
    }

    #[test]
    fn test_threaded_producer_finishes_on_its_own() {
        let source = StageNode::new(
            "src",
            BuiltinStage::CounterSource(CounterSource::new()),
            ProcessingMode::Threaded,
        );
        source.set_property("count", PropertyValue::Int(3)).unwrap();
        let sink = InputSocket::detached("sink", 8);
        source.output("out").unwrap().connect(&sink);

        source.start().unwrap();
        assert!(source.wait_for(StageState::Stopped, TIMEOUT));
        let values: Vec<Value> = sink.queued();
        assert_eq!(values.len(), 4);
        assert_eq!(values[2].downcast_ref::<i64>(), Some(&2));
        assert!(matches!(values[3], Value::Stop));
    }

    #[test]
    fn test_producer_pause_and_resume() {
        let source = StageNode::new(
            "src",
            BuiltinStage::CounterSource(CounterSource::new()),
            ProcessingMode::Threaded,
        );
        source.set_property("count", PropertyValue::Int(1_000_000)).unwrap();
        source.set_property("interval_ms", PropertyValue::Int(1)).unwrap();
        let sink = InputSocket::detached("sink", 4);
        source.output("out").unwrap().connect(&sink);

        source.start().unwrap();
        assert_eq!(source.state(), StageState::Running);
        source.pause().unwrap();
        // The producer may be blocked on the full sink; make room until it pauses.
        let mut seen = Vec::new();
        while !source.wait_for(StageState::Paused, Duration::from_millis(10)) {
            if let Some(value) = sink.advance() {
                seen.push(value);
            }
        }
        while let Some(value) = sink.advance() {
            seen.push(value);
        }
        assert!(matches!(seen.last(), Some(Value::Pause)));

        source.start().unwrap();
        let mut resumed = None;
        for _ in 0..500 {
            if let Some(value) = sink.advance() {
                resumed = Some(value);
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(matches!(resumed, Some(Value::Resume(_))));
        source.interrupt();
        assert!(source.wait_for(StageState::Stopped, TIMEOUT));
    }

    #[test]
    fn test_processing_error_is_reported() {
        let collector = StageNode::new(
            "sink",
            BuiltinStage::Collector(Collector::new()),
            ProcessingMode::Inline,
        );
        collector
            .set_property("fail_on", PropertyValue::Int(2))
            .unwrap();
        let reports: Arc<Mutex<Vec<ErrorReport>>> = Arc::default();

        struct Capture(Arc<Mutex<Vec<ErrorReport>>>);
        impl StageListener for Capture {
            fn state_changed(&self, _: NodeId, _: &str, _: StageState) {}
            fn error_occurred(&self, report: &ErrorReport) {
                self.0.lock().push(report.clone());
            }
        }
        collector.add_listener(Arc::new(Capture(reports.clone())));

        let upstream = OutputSocket::new("up");
        upstream.connect(&collector.input("in").unwrap());
        collector.start().unwrap();
        upstream.send(Value::object(1i64)).unwrap();
        upstream.send(Value::object(2i64)).unwrap();

        assert!(collector.wait_for(StageState::Stopped, TIMEOUT));
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stage, "sink");
        assert_eq!(reports[0].node_id, collector.id());
    }

    #[test]
    fn test_reconfigure_stopped_stage_applies_immediately() {
        let node = passthrough("p", ProcessingMode::Inline);
        assert!(matches!(
            node.reconfigure("missing"),
            Err(PipelineError::UnknownPropertySet(_))
        ));
        let collector = StageNode::new(
            "c",
            BuiltinStage::Collector(Collector::new()),
            ProcessingMode::Inline,
        );
        let mut set = PropertySet::new();
        set.insert("fail_on".to_string(), PropertyValue::Int(7));
        collector.cache_property_set("strict", set);
        collector.reconfigure("strict").unwrap();
        assert_eq!(collector.property("fail_on"), Some(PropertyValue::Int(7)));
    }
}
