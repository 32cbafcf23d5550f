//! Compound node: a sub-graph of child nodes behind proxy sockets.
//!
//! A compound has no processor. Control calls are relayed to the children
//! and the compound's own state is aggregated from their notifications:
//! it enters an intermediate state as soon as a child leaves its steady
//! state and reaches a steady state once every child did. A child that
//! already passed through `Running` and then stopped on its own counts as
//! running.
//!
//! # Locking
//!
//! Child notifications only take the aggregation mutex, never the
//! transition lock, so a child may notify while the compound is in the
//! middle of relaying a control call to it.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{NodeId, SocketId};
use crate::pipeline::node::Node;
use crate::pipeline::socket::{InputSocket, OutputSocket, ProxySocket};
use crate::pipeline::state::{ErrorReport, Listeners, StageListener, StageState, StateCell};
use crate::pipeline::topology::TopologyPlan;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

// ── Aggregation ──

/// Last state seen from one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildRecord {
    pub state: StageState,
    /// Reached `Running` since the compound last started from `Stopped`.
    pub passed_running: bool,
}

impl ChildRecord {
    /// Whether this child counts as having reached `target`.
    fn satisfies(&self, target: StageState) -> bool {
        if self.state == target {
            return true;
        }
        match target {
            StageState::Running => {
                self.passed_running
                    && matches!(self.state, StageState::Stopping | StageState::Stopped)
            }
            _ => self.passed_running && self.state == StageState::Stopped,
        }
    }
}

/// Compound state implied by `children` when the compound is in `current`.
pub(crate) fn aggregate(current: StageState, children: &[ChildRecord]) -> StageState {
    if children.is_empty() {
        return match current {
            StageState::Starting => StageState::Running,
            StageState::Pausing => StageState::Paused,
            StageState::Stopping | StageState::Interrupted => StageState::Stopped,
            other => other,
        };
    }
    let any = |state: StageState| children.iter().any(|c| c.state == state);
    let all_satisfy = |target: StageState| children.iter().all(|c| c.satisfies(target));

    if children.iter().all(|c| c.state == StageState::Stopped) {
        return StageState::Stopped;
    }
    if current == StageState::Interrupted || any(StageState::Interrupted) {
        return StageState::Interrupted;
    }
    // A child winding down after it ran does not end a start in progress.
    let early_finish = current == StageState::Starting
        && children
            .iter()
            .filter(|c| c.state == StageState::Stopping)
            .all(|c| c.passed_running);
    if current == StageState::Stopping || (any(StageState::Stopping) && !early_finish) {
        return StageState::Stopping;
    }
    match current {
        StageState::Starting => {
            if all_satisfy(StageState::Running) {
                StageState::Running
            } else {
                StageState::Starting
            }
        }
        StageState::Running => {
            if any(StageState::Pausing) || any(StageState::Paused) {
                StageState::Pausing
            } else {
                StageState::Running
            }
        }
        StageState::Pausing => {
            if all_satisfy(StageState::Paused) {
                StageState::Paused
            } else {
                StageState::Pausing
            }
        }
        StageState::Paused | StageState::Stopped => {
            if any(StageState::Starting) || any(StageState::Running) {
                StageState::Starting
            } else {
                current
            }
        }
        other => other,
    }
}

#[derive(Default)]
struct Aggregation {
    records: HashMap<NodeId, ChildRecord>,
}

/// Listener registered on every child.
struct ChildObserver {
    compound: Weak<CompoundInner>,
}

impl StageListener for ChildObserver {
    fn state_changed(&self, node: NodeId, _name: &str, state: StageState) {
        if let Some(compound) = self.compound.upgrade() {
            compound.child_state_changed(node, state);
        }
    }

    fn error_occurred(&self, report: &ErrorReport) {
        if let Some(compound) = self.compound.upgrade() {
            compound.child_failed(report);
        }
    }
}

// ── Compound ──

/// A node made of child nodes.
pub struct Compound {
    inner: Arc<CompoundInner>,
}

struct CompoundInner {
    id: NodeId,
    name: String,
    children: RwLock<Vec<Arc<dyn Node>>>,
    inputs: RwLock<Vec<Arc<ProxySocket>>>,
    outputs: RwLock<Vec<Arc<ProxySocket>>>,
    transition: ReentrantMutex<()>,
    state: StateCell,
    aggregation: Mutex<Aggregation>,
    listeners: Listeners,
    observer: Arc<dyn StageListener>,
    interrupted: AtomicBool,
    checked: AtomicBool,
}

impl Compound {
    pub fn new(name: impl Into<String>) -> Arc<Compound> {
        let name = name.into();
        let id = NodeId::next();
        let inner = Arc::new_cyclic(|this: &Weak<CompoundInner>| CompoundInner {
            id,
            name,
            children: RwLock::new(Vec::new()),
            inputs: RwLock::new(Vec::new()),
            outputs: RwLock::new(Vec::new()),
            transition: ReentrantMutex::new(()),
            state: StateCell::new(),
            aggregation: Mutex::new(Aggregation::default()),
            listeners: Listeners::default(),
            observer: Arc::new(ChildObserver {
                compound: this.clone(),
            }),
            interrupted: AtomicBool::new(false),
            checked: AtomicBool::new(false),
        });
        tracing::debug!("Created compound '{}' ({})", inner.name, inner.id);
        Arc::new(Compound { inner })
    }

    // ── Children ──

    /// Add `child`. Only while stopped; names must be unique.
    pub fn add_child(&self, child: Arc<dyn Node>) -> PipelineResult<()> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("add a child")?;
        let mut children = self.inner.children.write();
        if children.iter().any(|c| c.name() == child.name()) {
            return Err(PipelineError::DuplicateStage(child.name().to_string()));
        }
        child.add_listener(self.inner.observer.clone());
        self.inner
            .aggregation
            .lock()
            .records
            .insert(child.id(), ChildRecord {
                state: child.state(),
                passed_running: false,
            });
        tracing::debug!("Compound '{}': added child '{}'", self.inner.name, child.name());
        children.push(child);
        self.inner.checked.store(false, Ordering::Release);
        Ok(())
    }

    /// Remove the child `name`, tearing down all of its connections.
    pub fn remove_child(&self, name: &str) -> PipelineResult<Arc<dyn Node>> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("remove a child")?;
        let mut children = self.inner.children.write();
        let index = children
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let child = children.remove(index);
        child.remove_listener(&self.inner.observer);
        child.detach();
        self.inner.aggregation.lock().records.remove(&child.id());
        self.inner.checked.store(false, Ordering::Release);
        Ok(child)
    }

    pub fn child(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.inner.child(name)
    }

    // ── Boundary sockets ──

    /// Create an input proxy: outside values enter the sub-graph through it.
    pub fn add_input(&self, name: impl Into<String>) -> PipelineResult<Arc<ProxySocket>> {
        self.add_proxy(name.into(), true)
    }

    /// Create an output proxy: sub-graph values leave through it.
    pub fn add_output(&self, name: impl Into<String>) -> PipelineResult<Arc<ProxySocket>> {
        self.add_proxy(name.into(), false)
    }

    fn add_proxy(&self, name: String, input: bool) -> PipelineResult<Arc<ProxySocket>> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("add a socket")?;
        let mut inputs = self.inner.inputs.write();
        let mut outputs = self.inner.outputs.write();
        if inputs.iter().chain(outputs.iter()).any(|p| p.name() == name) {
            return Err(PipelineError::InvalidConnection(format!(
                "compound '{}' already has a socket named '{}'",
                self.inner.name, name
            )));
        }
        let index = (inputs.len() + outputs.len()) as u16;
        let proxy = ProxySocket::with_id(SocketId::new(self.inner.id, index), name);
        if input {
            inputs.push(proxy.clone());
        } else {
            outputs.push(proxy.clone());
        }
        Ok(proxy)
    }

    /// Connect two sockets inside this compound.
    ///
    /// `from` names an output as `child.socket`, or an input proxy by its bare
    /// name. `to` names an input as `child.socket`, or an output proxy.
    pub fn connect(&self, from: &str, to: &str) -> PipelineResult<()> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("connect")?;
        let output = self.inner.resolve_output(from)?;
        let input = self.inner.resolve_input(to)?;
        output.connect(&input);
        self.inner.checked.store(false, Ordering::Release);
        Ok(())
    }

    /// Remove the edge feeding `to`.
    pub fn disconnect(&self, to: &str) -> PipelineResult<()> {
        let _guard = self.inner.transition.lock();
        self.inner.require_stopped("disconnect")?;
        self.inner.resolve_input(to)?.disconnect();
        self.inner.checked.store(false, Ordering::Release);
        Ok(())
    }

    /// Topology of the current children.
    pub fn topology(&self) -> TopologyPlan {
        TopologyPlan::analyze(&self.inner.children.read())
    }
}

impl Node for Compound {
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
        self.inner
            .inputs
            .read()
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.input().clone())
    }

    fn output(&self, name: &str) -> Option<Arc<OutputSocket>> {
        self.inner
            .outputs
            .read()
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.output().clone())
    }

    fn input_names(&self) -> Vec<String> {
        self.inner.inputs.read().iter().map(|p| p.name().to_string()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.inner.outputs.read().iter().map(|p| p.name().to_string()).collect()
    }

    fn detach(&self) {
        for proxy in self.inner.inputs.read().iter() {
            proxy.input().disconnect();
        }
        for proxy in self.inner.outputs.read().iter() {
            proxy.output().disconnect(None);
        }
    }

    fn wait_for(&self, state: StageState, timeout: Duration) -> bool {
        self.inner.state.wait_for(state, timeout)
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.inner.children.read().clone()
    }
}

impl Drop for Compound {
    fn drop(&mut self) {
        self.inner.interrupt();
    }
}

impl std::fmt::Debug for Compound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compound")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("children", &self.inner.children.read().len())
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl CompoundInner {
    fn child(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.children.read().iter().find(|c| c.name() == name).cloned()
    }

    fn require_stopped(&self, action: &'static str) -> PipelineResult<()> {
        match self.state.get() {
            StageState::Stopped => Ok(()),
            state => Err(PipelineError::InvalidState { action, state }),
        }
    }

    fn resolve_output(&self, path: &str) -> PipelineResult<Arc<OutputSocket>> {
        match path.split_once('.') {
            Some((child, socket)) => {
                let node = self
                    .child(child)
                    .ok_or_else(|| PipelineError::UnknownStage(child.to_string()))?;
                match node.output(socket) {
                    Some(output) => Ok(output),
                    None if node.input(socket).is_some() => Err(PipelineError::WrongDirection(
                        format!("'{}' is an input, expected an output", path),
                    )),
                    None => Err(PipelineError::UnknownSocket(path.to_string())),
                }
            }
            None => {
                if let Some(proxy) = self.inputs.read().iter().find(|p| p.name() == path) {
                    return Ok(proxy.output().clone());
                }
                if self.outputs.read().iter().any(|p| p.name() == path) {
                    return Err(PipelineError::WrongDirection(format!(
                        "'{}' is an output of '{}' and cannot feed its children",
                        path, self.name
                    )));
                }
                Err(PipelineError::UnknownSocket(path.to_string()))
            }
        }
    }

    fn resolve_input(&self, path: &str) -> PipelineResult<Arc<InputSocket>> {
        match path.split_once('.') {
            Some((child, socket)) => {
                let node = self
                    .child(child)
                    .ok_or_else(|| PipelineError::UnknownStage(child.to_string()))?;
                match node.input(socket) {
                    Some(input) => Ok(input),
                    None if node.output(socket).is_some() => Err(PipelineError::WrongDirection(
                        format!("'{}' is an output, expected an input", path),
                    )),
                    None => Err(PipelineError::UnknownSocket(path.to_string())),
                }
            }
            None => {
                if let Some(proxy) = self.outputs.read().iter().find(|p| p.name() == path) {
                    return Ok(proxy.input().clone());
                }
                if self.inputs.read().iter().any(|p| p.name() == path) {
                    return Err(PipelineError::WrongDirection(format!(
                        "'{}' is an input of '{}' and cannot be fed from inside",
                        path, self.name
                    )));
                }
                Err(PipelineError::UnknownSocket(path.to_string()))
            }
        }
    }

    // ── State ──

    /// Store `state` and notify. Called with the aggregation mutex held so
    /// notifications leave in the order the states were computed.
    fn publish(&self, state: StageState) {
        let previous = self.state.set(state);
        if previous != state {
            tracing::debug!("Compound '{}' ({}): {:?} -> {:?}", self.name, self.id, previous, state);
            self.listeners.state_changed(self.id, &self.name, state);
        }
    }

    fn recompute(&self, aggregation: &Aggregation) {
        let records: Vec<ChildRecord> = aggregation.records.values().copied().collect();
        let next = aggregate(self.state.get(), &records);
        self.publish(next);
    }

    fn child_state_changed(&self, node: NodeId, state: StageState) {
        let mut aggregation = self.aggregation.lock();
        let Some(record) = aggregation.records.get_mut(&node) else {
            return;
        };
        record.state = state;
        if state == StageState::Running {
            record.passed_running = true;
        }
        self.recompute(&aggregation);
    }

    fn child_failed(&self, report: &ErrorReport) {
        let report = report.within(&self.name);
        tracing::debug!("Compound '{}': child error from {}", self.name, report.location());
        self.listeners.error_occurred(&report);
        self.interrupt();
    }

    /// Mark `children` as starting before they are told to.
    fn expect_start(&self, children: &[Arc<dyn Node>], from_stopped: bool) {
        let mut aggregation = self.aggregation.lock();
        for child in children {
            if let Some(record) = aggregation.records.get_mut(&child.id()) {
                if from_stopped {
                    record.passed_running = false;
                }
                record.state = StageState::Starting;
            }
        }
        if aggregation.records.is_empty() {
            self.publish(StageState::Starting);
        }
        self.recompute(&aggregation);
    }

    /// Replace the record of `child` with its actual state.
    fn resync(&self, child: &Arc<dyn Node>) {
        let mut aggregation = self.aggregation.lock();
        if let Some(record) = aggregation.records.get_mut(&child.id()) {
            record.state = child.state();
        }
        self.recompute(&aggregation);
    }

    fn check_locked(&self, reset: bool) -> PipelineResult<()> {
        let children = self.children.read().clone();
        TopologyPlan::analyze(&children).ensure_acyclic()?;
        let mut failures = Vec::new();
        for child in &children {
            if let Err(e) = child.check(reset) {
                failures.push((child.name().to_string(), e));
            }
        }
        if !failures.is_empty() {
            return Err(PipelineError::Check(failures));
        }
        self.checked.store(true, Ordering::Release);
        Ok(())
    }

    fn start(&self) -> PipelineResult<()> {
        let _guard = self.transition.lock();
        let state = self.state.get();
        let from_stopped = match state {
            StageState::Stopped => true,
            StageState::Paused => false,
            state => {
                return Err(PipelineError::InvalidState {
                    action: "start",
                    state,
                })
            }
        };
        if from_stopped && !self.checked.load(Ordering::Acquire) {
            self.check_locked(true)?;
        }
        self.checked.store(false, Ordering::Release);
        self.interrupted.store(false, Ordering::SeqCst);

        let children = self.children.read().clone();
        let plan = TopologyPlan::analyze(&children);
        let targets: Vec<Arc<dyn Node>> = plan
            .start_order()
            .into_iter()
            .map(|i| children[i].clone())
            .filter(|child| from_stopped || child.state() == StageState::Paused)
            .collect();

        self.expect_start(&targets, from_stopped);
        for child in &targets {
            if self.interrupted.load(Ordering::SeqCst) {
                tracing::debug!("Compound '{}': start abandoned after interrupt", self.name);
                self.resync(child);
                continue;
            }
            match child.start() {
                Ok(()) => {}
                Err(PipelineError::InvalidState { state, .. }) => {
                    tracing::debug!(
                        "Compound '{}': child '{}' not started ({:?})",
                        self.name,
                        child.name(),
                        state
                    );
                    self.resync(child);
                }
                Err(e) => {
                    tracing::error!("Compound '{}': child '{}' failed to start: {}", self.name, child.name(), e);
                    self.resync(child);
                    self.interrupt();
                    return Err(e);
                }
            }
        }
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
        {
            let aggregation = self.aggregation.lock();
            self.publish(StageState::Pausing);
            self.recompute(&aggregation);
        }
        self.relay("pause", |child| child.pause())
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
        {
            let aggregation = self.aggregation.lock();
            self.publish(StageState::Stopping);
            self.recompute(&aggregation);
        }
        self.relay("stop", |child| child.stop())
    }

    /// Call `action` on every child; children in the wrong state are skipped.
    fn relay(
        &self,
        name: &str,
        action: impl Fn(&Arc<dyn Node>) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        let children = self.children.read().clone();
        for child in &children {
            match action(child) {
                Ok(()) => {}
                Err(PipelineError::InvalidState { state, .. }) => tracing::debug!(
                    "Compound '{}': {} skipped for '{}' ({:?})",
                    self.name,
                    name,
                    child.name(),
                    state
                ),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        {
            let aggregation = self.aggregation.lock();
            if self.state.get() == StageState::Stopped {
                return;
            }
            self.publish(StageState::Interrupted);
            self.recompute(&aggregation);
        }
        tracing::debug!("Compound '{}' ({}) interrupted", self.name, self.id);
        let children = self.children.read().clone();
        for child in &children {
            child.interrupt();
        }
    }

    fn reconfigure(&self, set: &str) -> PipelineResult<()> {
        let children = self.children.read().clone();
        let mut known = false;
        for child in &children {
            match child.reconfigure(set) {
                Ok(()) => known = true,
                Err(PipelineError::UnknownPropertySet(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if known {
            Ok(())
        } else {
            Err(PipelineError::UnknownPropertySet(set.to_string()))
        }
    }
}
