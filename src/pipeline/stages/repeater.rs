//! Repeater: emits every input object `times` times.
//!
//! The repetitions are bracketed with `start_many`/`end_many` so consumers
//! of the output see a one-to-many flow.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::property::{Configurable, PropertyValue};
use crate::pipeline::socket::SocketDescriptor;
use crate::pipeline::stage::{ProcessOutcome, Stage, StageContext};
use std::sync::atomic::{AtomicU64, Ordering};

static SOCKETS: &[SocketDescriptor] = &[
    SocketDescriptor::input("in"),
    SocketDescriptor::output("out"),
];

static PROPERTIES: &[&str] = &["times"];

pub struct Repeater {
    times: AtomicU64,
}

impl Repeater {
    pub fn new() -> Self {
        Self::with_times(2)
    }

    pub fn with_times(times: u64) -> Self {
        Self {
            times: AtomicU64::new(times),
        }
    }
}

impl Default for Repeater {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurable for Repeater {
    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "times" => Some(PropertyValue::Int(self.times.load(Ordering::Acquire) as i64)),
            _ => None,
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
        match name {
            "times" => {
                self.times.store(value.expect_count(name)?, Ordering::Release);
                Ok(())
            }
            _ => Err(PipelineError::UnknownProperty(name.to_string())),
        }
    }

    fn property_names(&self) -> &[&'static str] {
        PROPERTIES
    }
}

impl Stage for Repeater {
    fn class_name(&self) -> &'static str {
        "Repeater"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        let value = ctx.value(0)?;
        ctx.start_many(0)?;
        for _ in 0..self.times.load(Ordering::Acquire) {
            ctx.send(0, value.clone())?;
        }
        ctx.end_many(0)?;
        Ok(ProcessOutcome::Continue)
    }
}
