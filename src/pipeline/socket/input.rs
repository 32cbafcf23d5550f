//! Receiving endpoint of a connection.

use super::output::OutputSocket;
use super::queue::InputQueue;
use super::{SocketDescriptor, DEFAULT_QUEUE_CAPACITY};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::SocketId;
use crate::pipeline::value::{ResumeState, Value, ValueKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// Decides whether an offered value is accepted by the owner of an input.
///
/// Implemented by runtime stages (which route the value into their
/// processor) and by proxies (which forward it).
pub trait InputController: Send + Sync {
    /// `Ok(false)` means "not now": the sender retries once the input
    /// signals free capacity.
    fn try_to_receive(&self, input: &InputSocket, value: Value) -> PipelineResult<bool>;
}

struct InputState {
    queue: InputQueue,
    /// Value most recently advanced from the head.
    processable: Option<Value>,
    /// Per-thread processable values, used under a worker pool.
    assigned: Option<HashMap<ThreadId, Value>>,
    resume_state: ResumeState,
}

/// An input socket: a bounded queue plus the processable slot.
pub struct InputSocket {
    id: SocketId,
    name: String,
    optional: bool,
    group_id: AtomicI32,
    state: Mutex<InputState>,
    source: Mutex<Option<Weak<OutputSocket>>>,
    controller: Option<Weak<dyn InputController>>,
    /// Output side of a proxy, when this input belongs to one.
    forward: Option<Weak<OutputSocket>>,
}

impl InputSocket {
    /// A detached input that queues values itself and is owned by no stage.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::detached(name, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn detached(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self::build(
            SocketId::DETACHED,
            name.into(),
            0,
            false,
            capacity,
            None,
            None,
        ))
    }

    pub(crate) fn owned(
        id: SocketId,
        descriptor: &SocketDescriptor,
        controller: Weak<dyn InputController>,
    ) -> Self {
        Self::build(
            id,
            descriptor.name.to_string(),
            descriptor.group,
            descriptor.optional,
            DEFAULT_QUEUE_CAPACITY,
            Some(controller),
            None,
        )
    }

    pub(crate) fn proxy(
        id: SocketId,
        name: String,
        controller: Weak<dyn InputController>,
        forward: Weak<OutputSocket>,
    ) -> Self {
        Self::build(id, name, 0, true, 1, Some(controller), Some(forward))
    }

    fn build(
        id: SocketId,
        name: String,
        group: i32,
        optional: bool,
        capacity: usize,
        controller: Option<Weak<dyn InputController>>,
        forward: Option<Weak<OutputSocket>>,
    ) -> Self {
        Self {
            id,
            name,
            optional,
            group_id: AtomicI32::new(group),
            state: Mutex::new(InputState {
                queue: InputQueue::new(capacity),
                processable: None,
                assigned: None,
                resume_state: ResumeState::default(),
            }),
            source: Mutex::new(None),
            controller,
            forward,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn group_id(&self) -> i32 {
        self.group_id.load(Ordering::Acquire)
    }

    pub fn set_group_id(&self, group: i32) {
        self.group_id.store(group, Ordering::Release);
    }

    // ── Connection ──

    /// The output feeding this input, if it is still alive.
    pub fn connected_output(&self) -> Option<Arc<OutputSocket>> {
        self.source.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Whether a live upstream path feeds this input.
    pub fn is_connected(&self) -> bool {
        self.connected_output()
            .map(|output| output.has_live_source())
            .unwrap_or(false)
    }

    /// Whether values accepted here reach a consumer (always true outside proxies).
    pub(crate) fn is_live_target(&self) -> bool {
        match &self.forward {
            Some(forward) => forward.upgrade().map(|o| o.is_connected()).unwrap_or(false),
            None => true,
        }
    }

    /// Remove the edge to the current output, if any.
    pub fn disconnect(&self) {
        let previous = self.source.lock().take();
        if let Some(output) = previous.and_then(|w| w.upgrade()) {
            output.forget_input(self as *const InputSocket);
        }
    }

    pub(crate) fn attach_source(&self, output: Weak<OutputSocket>) {
        *self.source.lock() = Some(output);
    }

    /// Clear the source link if it points at `output`.
    pub(crate) fn detach_source(&self, output: *const OutputSocket) {
        let mut source = self.source.lock();
        if source.as_ref().map(Weak::as_ptr) == Some(output) {
            *source = None;
        }
    }

    // ── Queue ──

    /// Offer `value` through the owner's controller; without one, queue it directly.
    pub fn receive(&self, value: Value) -> PipelineResult<bool> {
        match self.controller.as_ref().and_then(Weak::upgrade) {
            Some(controller) => controller.try_to_receive(self, value),
            None => Ok(self.enqueue(value)),
        }
    }

    pub fn can_receive(&self) -> bool {
        !self.state.lock().queue.is_full()
    }

    /// Append at the tail. Returns `false` (and drops nothing) when full.
    pub fn enqueue(&self, value: Value) -> bool {
        self.state.lock().queue.push(value).is_ok()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().queue.capacity()
    }

    pub fn set_capacity(&self, capacity: usize) -> PipelineResult<()> {
        self.state.lock().queue.set_capacity(capacity)
    }

    pub fn head(&self) -> Option<Value> {
        self.state.lock().queue.head().cloned()
    }

    pub fn head_kind(&self) -> Option<ValueKind> {
        self.state.lock().queue.head().map(Value::kind)
    }

    /// Snapshot of the queued values, head first.
    pub fn queued(&self) -> Vec<Value> {
        self.state.lock().queue.iter().cloned().collect()
    }

    /// Move the head into the processable slot.
    ///
    /// Freeing a slot of a full queue tells the connected output it may
    /// retry its pending send.
    pub fn advance(&self) -> Option<Value> {
        let (value, was_full) = {
            let mut state = self.state.lock();
            let was_full = state.queue.is_full();
            let value = state.queue.pop()?;
            if let Value::Resume(resume) = &value {
                state.resume_state = *resume;
            }
            state.processable = Some(value.clone());
            (value, was_full)
        };
        if was_full {
            self.notify_source();
        }
        Some(value)
    }

    pub fn find(&self, kind: ValueKind) -> Option<usize> {
        self.state.lock().queue.find(kind)
    }

    pub fn jump(&self, index: usize) -> bool {
        self.state.lock().queue.jump(index)
    }

    /// Drop everything queued and the processable value.
    pub fn reset(&self) {
        let was_full = {
            let mut state = self.state.lock();
            let was_full = state.queue.is_full();
            state.queue.clear();
            state.processable = None;
            if let Some(assigned) = state.assigned.as_mut() {
                assigned.clear();
            }
            state.resume_state = ResumeState::default();
            was_full
        };
        if was_full {
            self.notify_source();
        }
    }

    fn notify_source(&self) {
        if let Some(output) = self.connected_output() {
            output.input_ready();
        }
    }

    // ── Processable value ──

    /// The value exposed to the stage for the calling thread.
    pub fn value(&self) -> Option<Value> {
        let state = self.state.lock();
        if let Some(assigned) = &state.assigned {
            if let Some(value) = assigned.get(&std::thread::current().id()) {
                return Some(value.clone());
            }
        }
        state.processable.clone()
    }

    /// Resume counters carried by the last resume tag advanced here.
    pub fn resume_state(&self) -> ResumeState {
        self.state.lock().resume_state
    }

    pub(crate) fn set_thread_indexed(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.assigned = if enabled { Some(HashMap::new()) } else { None };
    }

    /// Hand the current processable value to `thread`.
    pub(crate) fn assign_to(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        let Some(value) = state.processable.take() else {
            return;
        };
        match state.assigned.as_mut() {
            Some(assigned) => {
                assigned.insert(thread, value);
            }
            None => state.processable = Some(value),
        }
    }

    pub(crate) fn release(&self, thread: ThreadId) {
        if let Some(assigned) = self.state.lock().assigned.as_mut() {
            assigned.remove(&thread);
        }
    }
}

impl Drop for InputSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for InputSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSocket")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group_id())
            .finish()
    }
}
