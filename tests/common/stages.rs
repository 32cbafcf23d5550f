//! Stage classes that only exist for tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use visionflow::pipeline::{
    Configurable, PipelineResult, ProcessOutcome, SocketDescriptor, Stage, StageContext,
};

static SOCKETS: &[SocketDescriptor] = &[
    SocketDescriptor::input("in"),
    SocketDescriptor::output("out"),
];

/// Forwards `i64` objects after sleeping longer for smaller values.
///
/// Under a worker pool, later rounds finish first.
pub struct Sleeper {
    pub base_ms: u64,
    pub max_value: i64,
}

impl Configurable for Sleeper {}

impl Stage for Sleeper {
    fn class_name(&self) -> &'static str {
        "Sleeper"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        let value = *ctx.get::<i64>(0)?;
        let steps = (self.max_value - value).max(0) as u64;
        std::thread::sleep(Duration::from_millis(self.base_ms * steps));
        ctx.emit(0, value)?;
        Ok(ProcessOutcome::Continue)
    }
}

/// Forwards every object; on the first one it opens two `start_many`
/// brackets and one `start_delay` bracket and never closes them.
#[derive(Default)]
pub struct Bracketing {
    opened: AtomicBool,
}

impl Configurable for Bracketing {}

impl Stage for Bracketing {
    fn class_name(&self) -> &'static str {
        "Bracketing"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        if !self.opened.swap(true, Ordering::AcqRel) {
            ctx.start_many(0)?;
            ctx.start_many(0)?;
            ctx.start_delay(0)?;
        }
        ctx.send(0, ctx.value(0)?)?;
        Ok(ProcessOutcome::Continue)
    }
}
