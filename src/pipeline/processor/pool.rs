//! Worker-pool processing.
//!
//! The delivering thread (or, for producers, a driver thread) runs the flow
//! controller and reserves a free worker for each processable round. The
//! round's input values are assigned to the worker's thread id and an
//! emission turn is registered on every output before the job is handed
//! over, so outputs release values in reservation order.
//!
//! Terminal results (finished, paused, interrupted) wait until the last
//! in-flight round has returned; the thread that brings the in-flight count
//! to zero finalizes the stage.

use super::threaded::Driver;
use super::{Rounds, RunEnd};
use crate::pipeline::error::PipelineError;
use crate::pipeline::socket::InputSocket;
use crate::pipeline::stage::ProcessOutcome;
use crate::pipeline::stage_node::StageInner;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

struct Job {
    group: i32,
    round: u64,
    inputs: Vec<Arc<InputSocket>>,
}

struct Worker {
    thread: ThreadId,
    jobs: Sender<Job>,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<Worker>,
    free: Vec<usize>,
    in_flight: usize,
    terminal: Option<RunEnd>,
}

pub(crate) struct PoolProcessor {
    threads: usize,
    scheduling: Mutex<()>,
    dirty: AtomicBool,
    pool: Mutex<PoolState>,
    freed: Condvar,
    driver: Driver,
}

impl PoolProcessor {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            scheduling: Mutex::new(()),
            dirty: AtomicBool::new(false),
            pool: Mutex::new(PoolState::default()),
            freed: Condvar::new(),
            driver: Driver::new(),
        }
    }

    pub fn prepare_start(&self, inner: &StageInner) {
        let mut pool = self.pool.lock();
        pool.terminal = None;
        if pool.workers.is_empty() {
            for index in 0..self.threads {
                let (tx, rx) = crossbeam_channel::unbounded();
                let stage = inner.weak();
                let spawned = std::thread::Builder::new()
                    .name(format!("{}-worker-{}", inner.name(), index))
                    .spawn(move || worker_main(index, rx, stage));
                match spawned {
                    Ok(handle) => {
                        let slot = pool.workers.len();
                        pool.workers.push(Worker {
                            thread: handle.thread().id(),
                            jobs: tx,
                        });
                        pool.free.push(slot);
                    }
                    Err(e) => tracing::error!("Failed to spawn worker for '{}': {}", inner.name(), e),
                }
            }
            // Hand out the lowest slot first.
            pool.free.reverse();
            tracing::debug!("Stage '{}': {} pool workers", inner.name(), pool.workers.len());
        }
        drop(pool);
        if inner.is_producer() {
            self.driver
                .ensure_spawned(format!("{}-driver", inner.name()), inner.weak(), producer_cycle);
        }
    }

    pub fn kick(&self, inner: &StageInner) {
        if inner.is_producer() {
            self.driver.notify();
        } else {
            self.schedule(inner);
        }
    }

    /// Run the flow controller on this thread unless another thread already is.
    pub fn schedule(&self, inner: &StageInner) {
        self.dirty.store(true, Ordering::SeqCst);
        loop {
            let Some(guard) = self.scheduling.try_lock() else {
                return;
            };
            self.dirty.store(false, Ordering::SeqCst);
            let end = inner.drain(self);
            drop(guard);
            if end != RunEnd::Idle {
                self.complete(inner, end);
                return;
            }
            if !self.dirty.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    pub fn on_interrupt(&self, inner: &StageInner) {
        {
            let _pool = self.pool.lock();
            self.freed.notify_all();
        }
        self.driver.notify();
        self.complete(inner, RunEnd::Interrupted);
    }

    /// Record a terminal result; finalize now if no round is in flight.
    fn complete(&self, inner: &StageInner, end: RunEnd) {
        let ready = {
            let mut pool = self.pool.lock();
            if pool.terminal.is_none() {
                pool.terminal = Some(end);
            }
            if pool.in_flight == 0 {
                pool.terminal.take()
            } else {
                None
            }
        };
        if let Some(end) = ready {
            inner.finish_drain(end);
        }
    }

    fn dispatch(&self, inner: &StageInner, group: i32) -> ProcessOutcome {
        let (index, thread, jobs) = {
            let mut pool = self.pool.lock();
            loop {
                if inner.is_interrupted() {
                    return ProcessOutcome::Interrupted;
                }
                match pool.terminal {
                    Some(RunEnd::Finished) => return ProcessOutcome::Finished,
                    Some(RunEnd::Paused) => return ProcessOutcome::Paused,
                    Some(RunEnd::Interrupted) => return ProcessOutcome::Interrupted,
                    _ => {}
                }
                if let Some(index) = pool.free.pop() {
                    pool.in_flight += 1;
                    let worker = &pool.workers[index];
                    break (index, worker.thread, worker.jobs.clone());
                }
                self.freed.wait(&mut pool);
            }
        };

        // Rounds are numbered in the same order their emission turns are queued.
        let round = inner.next_round();
        let inputs = inner.group_inputs(group);
        for input in &inputs {
            input.assign_to(thread);
        }
        for output in inner.outputs() {
            output.start_emit(thread);
        }
        if jobs.send(Job {
            group,
            round,
            inputs,
        }).is_err() {
            let mut pool = self.pool.lock();
            pool.in_flight -= 1;
            pool.free.push(index);
            return ProcessOutcome::Error(PipelineError::ChannelSend);
        }
        ProcessOutcome::Continue
    }

    fn run_job(&self, inner: &StageInner, index: usize, job: Job) {
        let thread = std::thread::current().id();
        let mut outcome = if inner.is_interrupted() {
            ProcessOutcome::Interrupted
        } else {
            inner.process_round(job.group, job.round)
        };
        for input in &job.inputs {
            input.release(thread);
        }
        for output in inner.outputs() {
            if let Err(e) = output.end_emit(thread) {
                if matches!(outcome, ProcessOutcome::Continue) {
                    outcome = ProcessOutcome::from_result(Err(e));
                }
            }
        }

        let end = match outcome {
            ProcessOutcome::Continue => None,
            ProcessOutcome::Finished => Some(RunEnd::Finished),
            ProcessOutcome::Paused => Some(RunEnd::Paused),
            ProcessOutcome::Interrupted => Some(RunEnd::Interrupted),
            ProcessOutcome::Error(e) => {
                inner.fail(e);
                Some(RunEnd::Interrupted)
            }
        };

        let ready = {
            let mut pool = self.pool.lock();
            pool.in_flight -= 1;
            pool.free.push(index);
            self.freed.notify_all();
            if let Some(end) = end {
                if pool.terminal.is_none() {
                    pool.terminal = Some(end);
                }
            }
            if pool.in_flight == 0 {
                pool.terminal.take()
            } else {
                None
            }
        };
        if let Some(end) = ready {
            inner.finish_drain(end);
        }
    }
}

impl Rounds for PoolProcessor {
    fn run(&self, inner: &StageInner, group: i32) -> ProcessOutcome {
        self.dispatch(inner, group)
    }

    fn quiesce(&self, inner: &StageInner) {
        let mut pool = self.pool.lock();
        while pool.in_flight > 0 && !inner.is_interrupted() {
            self.freed.wait(&mut pool);
        }
    }
}

fn worker_main(index: usize, jobs: Receiver<Job>, stage: Weak<StageInner>) {
    for job in jobs.iter() {
        let Some(inner) = stage.upgrade() else {
            break;
        };
        if let Some(pool) = inner.pool() {
            pool.run_job(&inner, index, job);
        }
    }
}

fn producer_cycle(inner: &StageInner) {
    let Some(pool) = inner.pool() else {
        return;
    };
    let end = inner.run_producer(pool);
    if end != RunEnd::Idle {
        pool.complete(inner, end);
    }
}
