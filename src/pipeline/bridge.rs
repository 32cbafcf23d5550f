//! Thread boundary between a running pipeline and its owner.
//!
//! `Pipeline` wraps the root compound. Every node reports state changes to
//! an `EventBridge`, which forwards them over a bounded channel without ever
//! blocking the reporting thread. Error reports are taken from the root only,
//! where they arrive with their full ancestor path.

use crate::pipeline::compound::Compound;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::Node;
use crate::pipeline::stage_node::StageNode;
use crate::pipeline::state::{ErrorReport, StageListener, StageState};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Capacity of the event channel. Events beyond it are dropped and counted.
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Notifications delivered to the pipeline owner.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage or compound changed state.
    StateChanged {
        node: NodeId,
        name: String,
        state: StageState,
    },

    /// A stage failed; the report carries the path from the root.
    Error(ErrorReport),
}

struct BridgeShared {
    tx: Sender<PipelineEvent>,
    errors: Mutex<Vec<ErrorReport>>,
    dropped: AtomicU64,
}

impl BridgeShared {
    fn push(&self, event: PipelineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!("Pipeline event channel full; dropping events");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Listener installed on every node of a pipeline.
struct EventBridge {
    shared: Arc<BridgeShared>,
    /// Only the root's bridge records errors.
    root: bool,
}

impl StageListener for EventBridge {
    fn state_changed(&self, node: NodeId, name: &str, state: StageState) {
        self.shared.push(PipelineEvent::StateChanged {
            node,
            name: name.to_string(),
            state,
        });
    }

    fn error_occurred(&self, report: &ErrorReport) {
        if !self.root {
            return;
        }
        tracing::error!("{}", report);
        self.shared.errors.lock().push(report.clone());
        self.shared.push(PipelineEvent::Error(report.clone()));
    }
}

/// Final state of one stage, as recorded in a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub class: &'static str,
    pub mode: String,
    pub state: StageState,
}

/// Serializable outcome of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: Option<u64>,
    pub final_state: StageState,
    pub timed_out: bool,
    pub stages: Vec<StageSummary>,
    pub errors: Vec<ErrorReport>,
    pub dropped_events: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && !self.timed_out
    }
}

struct RunClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

/// A root compound plus its event plumbing.
pub struct Pipeline {
    root: Arc<Compound>,
    stages: BTreeMap<String, Arc<StageNode>>,
    shared: Arc<BridgeShared>,
    listeners: Vec<(Arc<dyn Node>, Arc<dyn StageListener>)>,
    events: Receiver<PipelineEvent>,
    clock: Mutex<Option<RunClock>>,
    timed_out: Mutex<bool>,
}

impl Pipeline {
    /// Wrap `root`. Bridges are installed on every node currently in the tree.
    pub fn new(root: Arc<Compound>) -> Self {
        Self::with_stages(root, BTreeMap::new())
    }

    /// Wrap `root`, keeping typed handles to the named stages.
    pub fn with_stages(root: Arc<Compound>, stages: BTreeMap<String, Arc<StageNode>>) -> Self {
        let (tx, events) = bounded(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(BridgeShared {
            tx,
            errors: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        });

        let mut listeners: Vec<(Arc<dyn Node>, Arc<dyn StageListener>)> = Vec::new();
        let root_node: Arc<dyn Node> = root.clone();
        let root_bridge: Arc<dyn StageListener> = Arc::new(EventBridge {
            shared: shared.clone(),
            root: true,
        });
        root_node.add_listener(root_bridge.clone());
        listeners.push((root_node.clone(), root_bridge));

        let mut pending = root_node.children();
        while let Some(node) = pending.pop() {
            let bridge: Arc<dyn StageListener> = Arc::new(EventBridge {
                shared: shared.clone(),
                root: false,
            });
            node.add_listener(bridge.clone());
            pending.extend(node.children());
            listeners.push((node, bridge));
        }
        tracing::debug!(
            "Pipeline '{}': event bridge installed on {} nodes",
            root.name(),
            listeners.len()
        );

        Self {
            root,
            stages,
            shared,
            listeners,
            events,
            clock: Mutex::new(None),
            timed_out: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &Arc<Compound> {
        &self.root
    }

    pub fn state(&self) -> StageState {
        self.root.state()
    }

    /// Typed handle of a stage created by the builder.
    pub fn stage(&self, name: &str) -> Option<&Arc<StageNode>> {
        self.stages.get(name)
    }

    /// Receiver of state and error events.
    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    /// Every error reported so far.
    pub fn errors(&self) -> Vec<ErrorReport> {
        self.shared.errors.lock().clone()
    }

    pub fn check(&self) -> PipelineResult<()> {
        self.root.check(true)
    }

    pub fn start(&self) -> PipelineResult<()> {
        if self.root.state() == StageState::Stopped {
            *self.clock.lock() = Some(RunClock {
                started_at: Utc::now(),
                started: Instant::now(),
            });
            *self.timed_out.lock() = false;
        }
        tracing::info!("Starting pipeline '{}'", self.name());
        self.root.start()
    }

    pub fn pause(&self) -> PipelineResult<()> {
        self.root.pause()
    }

    pub fn stop(&self) -> PipelineResult<()> {
        self.root.stop()
    }

    pub fn interrupt(&self) {
        self.root.interrupt();
    }

    pub fn reconfigure(&self, set: &str) -> PipelineResult<()> {
        self.root.reconfigure(set)
    }

    /// Block until the root is stopped; `false` on timeout.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        self.root.wait_for(StageState::Stopped, timeout)
    }

    /// Wait for the run to end, interrupting it after `timeout` if given.
    pub fn run_to_completion(&self, timeout: Option<Duration>) -> RunReport {
        let finished = match timeout {
            Some(timeout) => self.wait_until_stopped(timeout),
            None => {
                while !self.wait_until_stopped(Duration::from_secs(3600)) {}
                true
            }
        };
        if !finished {
            tracing::warn!("Pipeline '{}' did not stop in time; interrupting", self.name());
            *self.timed_out.lock() = true;
            self.interrupt();
        }
        self.report()
    }

    /// Snapshot of the current run.
    pub fn report(&self) -> RunReport {
        let clock = self.clock.lock();
        let stages = self
            .stages
            .values()
            .map(|stage| StageSummary {
                name: stage.name().to_string(),
                class: stage.class_name(),
                mode: stage.mode().to_string(),
                state: stage.state(),
            })
            .collect();
        RunReport {
            pipeline: self.name().to_string(),
            started_at: clock.as_ref().map(|c| c.started_at),
            finished_at: Utc::now(),
            elapsed_ms: clock.as_ref().map(|c| c.started.elapsed().as_millis() as u64),
            final_state: self.state(),
            timed_out: *self.timed_out.lock(),
            stages,
            errors: self.errors(),
            dropped_events: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.root.interrupt();
        for (node, listener) in self.listeners.drain(..) {
            node.remove_listener(&listener);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}
