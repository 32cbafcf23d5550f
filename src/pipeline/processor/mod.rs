//! Scheduling disciplines that execute a stage's processing rounds.
//!
//! - [`InlineProcessor`] processes on whichever thread delivered the value.
//! - [`ThreadedProcessor`] owns one thread woken for every accepted value;
//!   producers run their free-running loop on it.
//! - [`PoolProcessor`] schedules rounds on the delivering thread and runs
//!   them on a bounded set of workers, keeping output order.
//!
//! Every worker thread holds only a weak reference to its stage and exits
//! once the stage is dropped.

mod inline;
mod pool;
mod threaded;

pub(crate) use inline::InlineProcessor;
pub(crate) use pool::PoolProcessor;
pub(crate) use threaded::ThreadedProcessor;

use crate::pipeline::node::ProcessingMode;
use crate::pipeline::stage::ProcessOutcome;
use crate::pipeline::stage_node::StageInner;

/// How a drain or producer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunEnd {
    /// Nothing left to do for now.
    Idle,
    Finished,
    Paused,
    Interrupted,
}

/// Executes one round for a group whose values the flow controller exposed.
pub(crate) trait Rounds {
    fn run(&self, inner: &StageInner, group: i32) -> ProcessOutcome;

    /// Wait until no round is in flight.
    fn quiesce(&self, _inner: &StageInner) {}
}

/// Run every round on the calling thread.
pub(crate) struct Sequential;

impl Rounds for Sequential {
    fn run(&self, inner: &StageInner, group: i32) -> ProcessOutcome {
        inner.process_round(group, inner.next_round())
    }
}

pub(crate) enum Processor {
    Inline(InlineProcessor),
    Threaded(ThreadedProcessor),
    Pool(PoolProcessor),
}

impl Processor {
    pub fn new(mode: ProcessingMode) -> Self {
        match mode {
            ProcessingMode::Inline => Processor::Inline(InlineProcessor::new()),
            ProcessingMode::Threaded => Processor::Threaded(ThreadedProcessor::new()),
            ProcessingMode::Pool { threads } => Processor::Pool(PoolProcessor::new(threads)),
        }
    }

    /// Called under the transition lock before the stage enters `Starting`.
    pub fn prepare_start(&self, inner: &StageInner) {
        match self {
            Processor::Inline(_) => {}
            Processor::Threaded(p) => p.prepare_start(inner),
            Processor::Pool(p) => p.prepare_start(inner),
        }
    }

    /// Begin work after a successful `start`.
    pub fn kick(&self, inner: &StageInner) {
        match self {
            Processor::Inline(p) => p.schedule(inner),
            Processor::Threaded(p) => p.notify(),
            Processor::Pool(p) => p.kick(inner),
        }
    }

    /// An input of an active stage accepted a value.
    pub fn value_received(&self, inner: &StageInner) {
        match self {
            Processor::Inline(p) => p.schedule(inner),
            Processor::Threaded(p) => p.notify(),
            Processor::Pool(p) => p.schedule(inner),
        }
    }

    /// The stage entered `Interrupted`: wake blocked threads and stop once idle.
    pub fn on_interrupt(&self, inner: &StageInner) {
        match self {
            Processor::Inline(p) => p.on_interrupt(inner),
            Processor::Threaded(p) => p.on_interrupt(inner),
            Processor::Pool(p) => p.on_interrupt(inner),
        }
    }
}
