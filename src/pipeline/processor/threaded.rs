//! Dedicated-thread processing.
//!
//! The [`Driver`] is a persistent thread that sleeps on a condition variable
//! and runs one cycle per wake-up. The threaded processor uses it for both
//! consumers (drain the flow controller) and producers (free-running loop);
//! the worker pool reuses it to schedule producer rounds.

use super::Sequential;
use crate::pipeline::stage_node::StageInner;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

#[derive(Default)]
struct SignalState {
    pending: bool,
    closed: bool,
}

#[derive(Default)]
struct Signal {
    state: Mutex<SignalState>,
    wake: Condvar,
    busy: AtomicBool,
}

/// Persistent thread running `cycle` whenever it is notified.
pub(crate) struct Driver {
    signal: Arc<Signal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal::default()),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the thread on first use.
    pub fn ensure_spawned(&self, name: String, stage: Weak<StageInner>, cycle: fn(&StageInner)) {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }
        let signal = self.signal.clone();
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || driver_main(signal, stage, cycle));
        match spawned {
            Ok(handle) => *thread = Some(handle),
            Err(e) => tracing::error!("Failed to spawn thread '{}': {}", name, e),
        }
    }

    pub fn notify(&self) {
        self.signal.state.lock().pending = true;
        self.signal.wake.notify_one();
    }

    pub fn is_busy(&self) -> bool {
        self.signal.busy.load(Ordering::SeqCst)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.signal.state.lock().closed = true;
        self.signal.wake.notify_all();
        // Not joined: the last stage reference may be held by the driver itself.
        self.thread.lock().take();
    }
}

fn driver_main(signal: Arc<Signal>, stage: Weak<StageInner>, cycle: fn(&StageInner)) {
    loop {
        {
            let mut state = signal.state.lock();
            while !state.pending && !state.closed {
                signal.wake.wait(&mut state);
            }
            if state.closed {
                break;
            }
            state.pending = false;
        }
        let Some(inner) = stage.upgrade() else {
            break;
        };
        signal.busy.store(true, Ordering::SeqCst);
        cycle(&inner);
        signal.busy.store(false, Ordering::SeqCst);
    }
    tracing::debug!(
        "Thread '{}' exiting",
        std::thread::current().name().unwrap_or("unnamed")
    );
}

pub(crate) struct ThreadedProcessor {
    driver: Driver,
}

impl ThreadedProcessor {
    pub fn new() -> Self {
        Self {
            driver: Driver::new(),
        }
    }

    pub fn prepare_start(&self, inner: &StageInner) {
        self.driver
            .ensure_spawned(format!("{}-thread", inner.name()), inner.weak(), threaded_cycle);
    }

    pub fn notify(&self) {
        self.driver.notify();
    }

    pub fn on_interrupt(&self, inner: &StageInner) {
        self.driver.notify();
        if !self.driver.is_busy() {
            inner.finish_interrupt();
        }
    }
}

fn threaded_cycle(inner: &StageInner) {
    let end = if inner.is_producer() {
        inner.run_producer(&Sequential)
    } else {
        inner.drain(&Sequential)
    };
    inner.finish_drain(end);
}
