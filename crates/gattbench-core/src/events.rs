//! Diagnostic events broadcast by the orchestrator.
//!
//! These mirror what the event loop folds into the view, plus session
//! failures that never show up in the view. They are transient and meant for
//! log shippers and test observers.

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;
use crate::ids::{DeviceId, SessionId};
use crate::outcome::TestOutcome;

/// Event emitted by the orchestrator's event loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarnessEvent {
    /// An outcome was folded into the record list.
    OutcomeRecorded {
        /// Session that produced it, `None` for server-level tests.
        session_id: Option<SessionId>,
        /// The folded outcome.
        outcome: TestOutcome,
    },
    /// A session changed connection state.
    SessionState {
        /// Session identifier.
        session_id: SessionId,
        /// Peer device.
        device: DeviceId,
        /// New state.
        state: ConnectionState,
    },
    /// A session's sequence task failed unexpectedly.
    SessionFailed {
        /// Session identifier.
        session_id: SessionId,
        /// Failure description.
        reason: String,
    },
    /// The waiting-for-client count changed.
    ReadyCountChanged {
        /// New registry size.
        count: usize,
    },
}

impl HarnessEvent {
    /// Event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OutcomeRecorded { .. } => "outcome_recorded",
            Self::SessionState { .. } => "session_state",
            Self::SessionFailed { .. } => "session_failed",
            Self::ReadyCountChanged { .. } => "ready_count_changed",
        }
    }

    /// Session the event belongs to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::OutcomeRecorded { session_id, .. } => session_id.as_ref(),
            Self::SessionState { session_id, .. } | Self::SessionFailed { session_id, .. } => {
                Some(session_id)
            }
            Self::ReadyCountChanged { .. } => None,
        }
    }
}
