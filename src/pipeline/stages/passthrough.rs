//! Passthrough: forwards every input object unchanged.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::property::Configurable;
use crate::pipeline::socket::SocketDescriptor;
use crate::pipeline::stage::{ProcessOutcome, Stage, StageContext};

static SOCKETS: &[SocketDescriptor] = &[
    SocketDescriptor::input("in"),
    SocketDescriptor::output("out"),
];

pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurable for Passthrough {}

impl Stage for Passthrough {
    fn class_name(&self) -> &'static str {
        "Passthrough"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        ctx.send(0, ctx.value(0)?)?;
        Ok(ProcessOutcome::Continue)
    }
}
