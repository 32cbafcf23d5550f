//! Recording listener for state sequences

use parking_lot::Mutex;
use visionflow::pipeline::{ErrorReport, NodeId, StageListener};
use visionflow::StageState;

/// Records every notification it receives, in order
#[derive(Default)]
pub struct StateRecorder {
    states: Mutex<Vec<(String, StageState)>>,
    errors: Mutex<Vec<ErrorReport>>,
}

impl StateRecorder {
    /// States reported for `name`, consecutive duplicates removed
    pub fn states_of(&self, name: &str) -> Vec<StageState> {
        let mut states: Vec<StageState> = self
            .states
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .collect();
        states.dedup();
        states
    }

    /// Position of the first `(name, state)` notification
    pub fn position(&self, name: &str, state: StageState) -> Option<usize> {
        self.states
            .lock()
            .iter()
            .position(|(n, s)| n == name && *s == state)
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors.lock().clone()
    }
}

impl StageListener for StateRecorder {
    fn state_changed(&self, _node: NodeId, name: &str, state: StageState) {
        self.states.lock().push((name.to_string(), state));
    }

    fn error_occurred(&self, report: &ErrorReport) {
        self.errors.lock().push(report.clone());
    }
}
