//! Collector: sink that records what reaches it.
//!
//! Every processed object and every synchronization event is appended to a
//! shared buffer. [`CollectorHandle`] clones of that buffer stay valid after
//! the stage is moved into a node, so callers can inspect or wait for results.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::flow::SyncEvent;
use crate::pipeline::property::{Configurable, PropertyValue};
use crate::pipeline::socket::SocketDescriptor;
use crate::pipeline::stage::{ProcessOutcome, Stage, StageContext};
use crate::pipeline::value::Value;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

static SOCKETS: &[SocketDescriptor] = &[SocketDescriptor::input("in")];

static PROPERTIES: &[&str] = &["count", "fail_on"];

#[derive(Default)]
struct Records {
    values: Vec<Value>,
    events: Vec<SyncEvent>,
}

#[derive(Default)]
struct Shared {
    records: Mutex<Records>,
    changed: Condvar,
}

/// Read access to a collector's records.
#[derive(Clone, Default)]
pub struct CollectorHandle {
    shared: Arc<Shared>,
}

impl CollectorHandle {
    pub fn len(&self) -> usize {
        self.shared.records.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<Value> {
        self.shared.records.lock().values.clone()
    }

    /// Collected objects of type `T`, in arrival order.
    pub fn objects<T: Any + Clone>(&self) -> Vec<T> {
        self.shared
            .records
            .lock()
            .values
            .iter()
            .filter_map(|v| v.downcast_ref::<T>().cloned())
            .collect()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.shared.records.lock().events.clone()
    }

    pub fn clear(&self) {
        let mut records = self.shared.records.lock();
        records.values.clear();
        records.events.clear();
    }

    /// Block until at least `count` objects arrived; `false` on timeout.
    pub fn wait_for_len(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut records = self.shared.records.lock();
        while records.values.len() < count {
            if self
                .shared
                .changed
                .wait_until(&mut records, deadline)
                .timed_out()
            {
                return records.values.len() >= count;
            }
        }
        true
    }

    fn push_value(&self, value: Value) {
        self.shared.records.lock().values.push(value);
        self.shared.changed.notify_all();
    }

    fn push_event(&self, event: SyncEvent) {
        self.shared.records.lock().events.push(event);
        self.shared.changed.notify_all();
    }
}

pub struct Collector {
    handle: CollectorHandle,
    /// An `i64` object equal to this fails the round.
    fail_on: Mutex<Option<i64>>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            handle: CollectorHandle::default(),
            fail_on: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> CollectorHandle {
        self.handle.clone()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurable for Collector {
    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "count" => Some(PropertyValue::Int(self.handle.len() as i64)),
            "fail_on" => self.fail_on.lock().map(PropertyValue::Int),
            _ => None,
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
        match name {
            "count" => Err(PipelineError::InvalidProperty {
                name: name.to_string(),
                message: "read-only".to_string(),
            }),
            "fail_on" => {
                let target = value.as_int().ok_or_else(|| PipelineError::InvalidProperty {
                    name: name.to_string(),
                    message: format!("expected an integer, got {}", value),
                })?;
                *self.fail_on.lock() = Some(target);
                Ok(())
            }
            _ => Err(PipelineError::UnknownProperty(name.to_string())),
        }
    }

    fn property_names(&self) -> &[&'static str] {
        PROPERTIES
    }
}

impl Stage for Collector {
    fn class_name(&self) -> &'static str {
        "Collector"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn check(&self, _ctx: &StageContext, reset: bool) -> PipelineResult<()> {
        if reset {
            self.handle.clear();
        }
        Ok(())
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        let value = ctx.value(0)?;
        let fail_on = *self.fail_on.lock();
        if let (Some(target), Some(v)) = (fail_on, value.downcast_ref::<i64>()) {
            if *v == target {
                return Err(ctx.error(format!("rejected value {}", v)));
            }
        }
        self.handle.push_value(value);
        Ok(ProcessOutcome::Continue)
    }

    fn sync_event(&self, event: SyncEvent, _ctx: &StageContext) -> PipelineResult<()> {
        self.handle.push_event(event);
        Ok(())
    }
}
