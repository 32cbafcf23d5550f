//! Run states, state observation and error reports.

use crate::pipeline::error::PipelineError;
use crate::pipeline::id::NodeId;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Run state of a stage or compound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Stopping,
    Interrupted,
}

impl StageState {
    /// States in which incoming values are processed.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StageState::Starting | StageState::Running | StageState::Pausing | StageState::Stopping
        )
    }

    /// Transitional states that lead to a steady one.
    pub fn is_intermediate(self) -> bool {
        matches!(
            self,
            StageState::Starting | StageState::Pausing | StageState::Stopping | StageState::Interrupted
        )
    }
}

/// Receives notifications from a node.
#[cfg_attr(test, mockall::automock)]
pub trait StageListener: Send + Sync {
    fn state_changed(&self, node: NodeId, name: &str, state: StageState);

    fn error_occurred(&self, _report: &ErrorReport) {}
}

/// An error raised by a stage, with enough context to locate it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    /// Instance id of the stage that failed.
    pub node_id: NodeId,
    pub stage: String,
    /// Names of the enclosing compounds, outermost first.
    pub path: Vec<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip)]
    pub error: Arc<PipelineError>,
}

impl ErrorReport {
    pub fn new(node_id: NodeId, stage: &str, error: PipelineError) -> Self {
        Self {
            node_id,
            stage: stage.to_string(),
            path: Vec::new(),
            message: error.to_string(),
            occurred_at: Utc::now(),
            error: Arc::new(error),
        }
    }

    /// Copy of this report seen from the compound `name`.
    pub fn within(&self, name: &str) -> Self {
        let mut report = self.clone();
        report.path.insert(0, name.to_string());
        report
    }

    /// Slash-separated location, e.g. `root/detector/blur`.
    pub fn location(&self) -> String {
        let mut parts = self.path.clone();
        parts.push(self.stage.clone());
        parts.join("/")
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.location(), self.node_id, self.message)
    }
}

// ── Observable state cell ──

/// Current state plus a condition variable for `wait_for`.
pub(crate) struct StateCell {
    current: Mutex<StageState>,
    changed: Condvar,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(StageState::Stopped),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> StageState {
        *self.current.lock()
    }

    /// Store `state`, returning the previous one.
    pub fn set(&self, state: StageState) -> StageState {
        let mut current = self.current.lock();
        let previous = std::mem::replace(&mut *current, state);
        self.changed.notify_all();
        previous
    }

    pub fn wait_for(&self, state: StageState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut current = self.current.lock();
        while *current != state {
            if self.changed.wait_until(&mut current, deadline).timed_out() {
                return *current == state;
            }
        }
        true
    }
}

// ── Listener list ──

#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Vec<Arc<dyn StageListener>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn StageListener>) {
        self.inner.lock().push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn StageListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.inner
            .lock()
            .retain(|l| Arc::as_ptr(l) as *const () != target);
    }

    fn snapshot(&self) -> Vec<Arc<dyn StageListener>> {
        self.inner.lock().clone()
    }

    pub fn state_changed(&self, node: NodeId, name: &str, state: StageState) {
        for listener in self.snapshot() {
            listener.state_changed(node, name, state);
        }
    }

    pub fn error_occurred(&self, report: &ErrorReport) {
        for listener in self.snapshot() {
            listener.error_occurred(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_active_states() {
        assert!(StageState::Running.is_active());
        assert!(StageState::Stopping.is_active());
        assert!(!StageState::Paused.is_active());
        assert!(!StageState::Stopped.is_active());
        assert!(!StageState::Interrupted.is_active());
    }

    #[test]
    fn test_wait_for_state() {
        let cell = Arc::new(StateCell::new());
        assert!(!cell.wait_for(StageState::Running, Duration::from_millis(10)));

        let setter = cell.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set(StageState::Running);
        });
        assert!(cell.wait_for(StageState::Running, Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_listeners_notified_and_removed() {
        let mut mock = MockStageListener::new();
        mock.expect_state_changed()
            .with(eq(NodeId(3)), eq("blur"), eq(StageState::Starting))
            .times(1)
            .return_const(());
        let listener: Arc<dyn StageListener> = Arc::new(mock);

        let listeners = Listeners::default();
        listeners.add(listener.clone());
        listeners.state_changed(NodeId(3), "blur", StageState::Starting);
        listeners.remove(&listener);
        listeners.state_changed(NodeId(3), "blur", StageState::Running);
    }

    #[test]
    fn test_error_report_location() {
        let report = ErrorReport::new(NodeId(9), "blur", PipelineError::ChannelSend)
            .within("detector")
            .within("root");
        assert_eq!(report.location(), "root/detector/blur");
        assert_eq!(report.to_string(), "root/detector/blur (#9): Channel send error");
    }
}
