//! Sending endpoint of a connection.
//!
//! # Delivery
//!
//! `try_send` offers a value to every connected input that has not yet
//! accepted it and remembers who did, so a retry only reaches the inputs
//! that refused. `send` repeats `try_send`, sleeping on the socket's
//! condition variable until an input frees a slot (`input_ready`) or the
//! socket is interrupted.
//!
//! # Ordering
//!
//! An output marked as ordered routes every value through its emission
//! turn queue (see `turns`) so rounds executed concurrently by a worker
//! pool leave in scheduling order. A worker that has buffered
//! [`TURN_BUFFER_LIMIT`] values behind an unfinished earlier turn blocks
//! until that turn completes.

use super::input::InputSocket;
use super::turns::EmissionTurns;
use super::SocketDescriptor;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::SocketId;
use crate::pipeline::value::{ResumeState, Value};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

/// Values one worker may hold back before its sends block.
pub const TURN_BUFFER_LIMIT: usize = 64;

struct Link {
    input: Weak<InputSocket>,
    /// Whether `input` already took the value currently being sent.
    accepted: bool,
}

#[derive(Default)]
struct Links {
    targets: Vec<Link>,
    /// Bumped whenever a waiting sender should retry.
    generation: u64,
}

/// An output socket: fan-out to any number of inputs.
pub struct OutputSocket {
    id: SocketId,
    name: String,
    group_id: AtomicI32,
    links: Mutex<Links>,
    ready: Condvar,
    /// Serializes blocking sends so partial-send bookkeeping refers to one value.
    emit_lock: Mutex<()>,
    ordered: AtomicBool,
    turns: Mutex<EmissionTurns>,
    turn_moved: Condvar,
    flush_lock: Mutex<()>,
    flow_level: AtomicI32,
    delay: AtomicI32,
    paused_state: Mutex<ResumeState>,
    interrupted: AtomicBool,
    /// Input side of a proxy, when this output belongs to one.
    upstream: OnceLock<Weak<InputSocket>>,
}

impl OutputSocket {
    /// A detached output owned by no stage.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(SocketId::DETACHED, name.into(), 0))
    }

    pub(crate) fn owned(id: SocketId, descriptor: &SocketDescriptor) -> Self {
        Self::build(id, descriptor.name.to_string(), descriptor.group)
    }

    pub(crate) fn proxy(id: SocketId, name: String) -> Self {
        Self::build(id, name, 0)
    }

    fn build(id: SocketId, name: String, group: i32) -> Self {
        Self {
            id,
            name,
            group_id: AtomicI32::new(group),
            links: Mutex::new(Links::default()),
            ready: Condvar::new(),
            emit_lock: Mutex::new(()),
            ordered: AtomicBool::new(false),
            turns: Mutex::new(EmissionTurns::default()),
            turn_moved: Condvar::new(),
            flush_lock: Mutex::new(()),
            flow_level: AtomicI32::new(0),
            delay: AtomicI32::new(0),
            paused_state: Mutex::new(ResumeState::default()),
            interrupted: AtomicBool::new(false),
            upstream: OnceLock::new(),
        }
    }

    pub(crate) fn set_upstream(&self, input: Weak<InputSocket>) {
        let _ = self.upstream.set(input);
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_id(&self) -> i32 {
        self.group_id.load(Ordering::Acquire)
    }

    pub fn set_group_id(&self, group: i32) {
        self.group_id.store(group, Ordering::Release);
    }

    // ── Connection graph ──

    /// Connect `input` to this output, replacing the input's previous edge.
    pub fn connect(self: &Arc<Self>, input: &Arc<InputSocket>) {
        input.disconnect();
        self.links.lock().targets.push(Link {
            input: Arc::downgrade(input),
            accepted: false,
        });
        input.attach_source(Arc::downgrade(self));
        tracing::debug!("Connected output '{}' -> input '{}'", self.name, input.name());
    }

    /// Disconnect one input, or every input when `input` is `None`.
    pub fn disconnect(&self, input: Option<&InputSocket>) {
        match input {
            Some(input) => {
                let ours = input
                    .connected_output()
                    .map(|o| std::ptr::eq(Arc::as_ptr(&o), self))
                    .unwrap_or(false);
                if ours {
                    input.disconnect();
                }
            }
            None => {
                let targets = std::mem::take(&mut self.links.lock().targets);
                for link in targets {
                    if let Some(input) = link.input.upgrade() {
                        input.detach_source(self as *const OutputSocket);
                    }
                }
                self.wake_senders();
            }
        }
    }

    pub(crate) fn forget_input(&self, input: *const InputSocket) {
        self.links
            .lock()
            .targets
            .retain(|link| link.input.as_ptr() != input);
        self.wake_senders();
    }

    pub fn connected_inputs(&self) -> Vec<Arc<InputSocket>> {
        self.links
            .lock()
            .targets
            .iter()
            .filter_map(|link| link.input.upgrade())
            .collect()
    }

    /// Whether at least one live downstream path exists.
    pub fn is_connected(&self) -> bool {
        self.connected_inputs()
            .iter()
            .any(|input| input.is_live_target())
    }

    /// Whether values reaching this output have a producer (always true outside proxies).
    pub(crate) fn has_live_source(&self) -> bool {
        match self.upstream.get() {
            Some(upstream) => upstream.upgrade().map(|i| i.is_connected()).unwrap_or(false),
            None => true,
        }
    }

    // ── Delivery ──

    /// Deliver `value` to every connected input, blocking while any is full.
    pub fn send(&self, value: Value) -> PipelineResult<()> {
        if self.ordered.load(Ordering::Acquire) {
            let thread = std::thread::current().id();
            {
                let mut turns = self.turns.lock();
                while turns.held_back(thread) >= TURN_BUFFER_LIMIT {
                    if self.interrupted.load(Ordering::Acquire) {
                        return Err(PipelineError::Interrupted);
                    }
                    self.turn_moved.wait(&mut turns);
                }
                turns.push(thread, value);
            }
            return self.flush_turns();
        }
        self.deliver(value)
    }

    fn deliver(&self, value: Value) -> PipelineResult<()> {
        let _emit = self.emit_lock.lock();
        loop {
            let generation = self.links.lock().generation;
            if self.try_send(&value)? {
                return Ok(());
            }
            let mut links = self.links.lock();
            while links.generation == generation && !self.interrupted.load(Ordering::Acquire) {
                self.ready.wait(&mut links);
            }
        }
    }

    /// Offer `value` to the inputs that have not accepted it yet.
    ///
    /// Returns `true` once every input has accepted; the bookkeeping is then
    /// cleared and waiting senders are woken.
    pub fn try_send(&self, value: &Value) -> PipelineResult<bool> {
        if self.interrupted.load(Ordering::Acquire) {
            return Err(PipelineError::Interrupted);
        }
        let pending: Vec<Arc<InputSocket>> = self
            .links
            .lock()
            .targets
            .iter()
            .filter(|link| !link.accepted)
            .filter_map(|link| link.input.upgrade())
            .collect();

        let mut accepted = Vec::with_capacity(pending.len());
        for input in &pending {
            if input.receive(value.clone())? {
                accepted.push(Arc::as_ptr(input));
            }
        }

        let mut links = self.links.lock();
        for link in links.targets.iter_mut() {
            if accepted.contains(&link.input.as_ptr()) {
                link.accepted = true;
            }
        }
        let complete = links
            .targets
            .iter()
            .all(|link| link.accepted || link.input.strong_count() == 0);
        if complete {
            for link in links.targets.iter_mut() {
                link.accepted = false;
            }
            links.generation = links.generation.wrapping_add(1);
            self.ready.notify_all();
        }
        Ok(complete)
    }

    /// Called by a connected input after it freed a slot.
    pub fn input_ready(&self) {
        self.wake_senders();
        if let Some(upstream) = self.upstream.get().and_then(Weak::upgrade) {
            if let Some(source) = upstream.connected_output() {
                source.input_ready();
            }
        }
    }

    fn wake_senders(&self) {
        let mut links = self.links.lock();
        links.generation = links.generation.wrapping_add(1);
        self.ready.notify_all();
    }

    // ── Emission turns ──

    pub(crate) fn set_ordered(&self, ordered: bool) {
        self.ordered.store(ordered, Ordering::Release);
    }

    /// Reserve the next emission turn for `thread`.
    pub(crate) fn start_emit(&self, thread: ThreadId) {
        if self.ordered.load(Ordering::Acquire) {
            self.turns.lock().register(thread);
        }
    }

    /// Close `thread`'s turn and release whatever became deliverable.
    pub(crate) fn end_emit(&self, thread: ThreadId) -> PipelineResult<()> {
        if !self.ordered.load(Ordering::Acquire) {
            return Ok(());
        }
        {
            let mut turns = self.turns.lock();
            turns.finish(thread);
            self.turn_moved.notify_all();
        }
        self.flush_turns()
    }

    fn flush_turns(&self) -> PipelineResult<()> {
        loop {
            let Some(flushing) = self.flush_lock.try_lock() else {
                // Another thread is flushing and will pick our values up.
                return Ok(());
            };
            loop {
                let next = {
                    let mut turns = self.turns.lock();
                    let next = turns.next();
                    self.turn_moved.notify_all();
                    next
                };
                match next {
                    Some(value) => self.deliver(value)?,
                    None => break,
                }
            }
            drop(flushing);
            if !self.turns.lock().has_deliverable() {
                return Ok(());
            }
        }
    }

    // ── Flow-rate bracketing ──

    /// Open a one-to-many bracket: emits a start tag and raises the flow level.
    pub fn start_many(&self) -> PipelineResult<()> {
        self.flow_level.fetch_add(1, Ordering::AcqRel);
        self.send(Value::Start)
    }

    /// Close a one-to-many bracket.
    pub fn end_many(&self) -> PipelineResult<()> {
        self.flow_level.fetch_sub(1, Ordering::AcqRel);
        self.send(Value::End)
    }

    pub fn start_delay(&self) {
        self.delay.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_delay(&self) {
        self.delay.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn flow_level(&self) -> i32 {
        self.flow_level.load(Ordering::Acquire)
    }

    pub fn delay(&self) -> i32 {
        self.delay.load(Ordering::Acquire)
    }

    /// Record the open brackets and emit a pause tag.
    pub fn pause(&self) -> PipelineResult<()> {
        *self.paused_state.lock() = ResumeState::new(self.flow_level(), self.delay());
        self.send(Value::Pause)
    }

    /// Emit a resume tag carrying `input` plus the brackets recorded at pause.
    pub fn resume(&self, input: ResumeState) -> PipelineResult<()> {
        let own = std::mem::take(&mut *self.paused_state.lock());
        self.send(Value::Resume(input + own))
    }

    pub fn stop(&self) -> PipelineResult<()> {
        self.send(Value::Stop)
    }

    // ── Cancellation ──

    /// Fail pending and future sends with `PipelineError::Interrupted`.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        let mut links = self.links.lock();
        for link in links.targets.iter_mut() {
            link.accepted = false;
        }
        links.generation = links.generation.wrapping_add(1);
        self.ready.notify_all();
        drop(links);
        let _turns = self.turns.lock();
        self.turn_moved.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Prepare for a fresh run.
    pub(crate) fn reset(&self) {
        self.interrupted.store(false, Ordering::Release);
        self.flow_level.store(0, Ordering::Release);
        self.delay.store(0, Ordering::Release);
        *self.paused_state.lock() = ResumeState::default();
        self.turns.lock().clear();
        for link in self.links.lock().targets.iter_mut() {
            link.accepted = false;
        }
    }
}

impl Drop for OutputSocket {
    fn drop(&mut self) {
        self.disconnect(None);
    }
}

impl std::fmt::Debug for OutputSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSocket")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group_id())
            .finish()
    }
}
