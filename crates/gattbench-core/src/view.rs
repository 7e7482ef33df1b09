//! Aggregated view published to observers.

use serde::{Deserialize, Serialize};

use crate::outcome::TestOutcome;

/// Server lifecycle phase shown to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ServerPhase {
    /// Server is up; `count` sessions have reached Ready.
    WaitingForClient {
        /// Number of sessions currently in the registry.
        count: usize,
    },
}

impl Default for ServerPhase {
    fn default() -> Self {
        Self::WaitingForClient { count: 0 }
    }
}

/// Snapshot of everything the harness has observed so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerViewState {
    /// Latest outcome per test name, in first-seen order.
    pub test_items: Vec<TestOutcome>,
    /// Current phase.
    pub state: ServerPhase,
}

impl ServerViewState {
    /// Latest outcome for `test_name`, if recorded.
    pub fn outcome(&self, test_name: &str) -> Option<&TestOutcome> {
        self.test_items.iter().find(|o| o.test_name == test_name)
    }

    /// Number of ready clients in the current phase.
    pub fn waiting_count(&self) -> usize {
        match self.state {
            ServerPhase::WaitingForClient { count } => count,
        }
    }

    /// Whether every recorded test passed.
    pub fn all_passed(&self) -> bool {
        self.test_items.iter().all(|o| o.is_passed)
    }
}
