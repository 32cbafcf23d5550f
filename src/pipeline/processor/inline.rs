//! Processing on the delivering thread.

use super::{RunEnd, Sequential};
use crate::pipeline::stage_node::StageInner;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct InlineProcessor {
    processing: Mutex<()>,
    /// Set by every delivery; a running drain loops again when it sees it.
    dirty: AtomicBool,
}

impl InlineProcessor {
    pub fn new() -> Self {
        Self {
            processing: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Drain on this thread unless another thread already is.
    pub fn schedule(&self, inner: &StageInner) {
        self.dirty.store(true, Ordering::SeqCst);
        loop {
            let Some(guard) = self.processing.try_lock() else {
                return;
            };
            self.dirty.store(false, Ordering::SeqCst);
            let end = inner.drain(&Sequential);
            drop(guard);
            inner.finish_drain(end);
            // An interrupt that found the lock held left the transition to us.
            if inner.is_interrupted() {
                inner.finish_interrupt();
                return;
            }
            if end != RunEnd::Idle || !self.dirty.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    pub fn on_interrupt(&self, inner: &StageInner) {
        // A drain in progress re-checks the flag after releasing the lock.
        if let Some(guard) = self.processing.try_lock() {
            drop(guard);
            inner.finish_interrupt();
        }
    }
}
