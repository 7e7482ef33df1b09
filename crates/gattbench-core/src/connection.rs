//! Connection-state transitions reported by a client connection.
//!
//! `Connecting → Ready → Disconnected` with `Disconnected` terminal and
//! reachable from any non-terminal state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Disconnected locally on request.
    Success,
    /// The local host terminated the link.
    TerminateLocalHost,
    /// The peer terminated the link.
    TerminatePeerUser,
    /// Supervision timeout / link loss.
    LinkLoss,
    /// The peer lacks a required feature.
    NotSupported,
    /// Connection attempt was cancelled.
    Cancelled,
    /// Connection attempt timed out.
    Timeout,
    /// Anything the stack could not classify.
    Unknown,
}

/// State of one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Server-confirmed ready for protocol operations.
    Ready,
    /// Terminal state.
    Disconnected {
        /// Why the link ended.
        reason: DisconnectReason,
    },
}

impl ConnectionState {
    /// Whether no further transitions can follow.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Repeating the current state is not a transition and returns `false`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Ready)
                | (Self::Connecting | Self::Ready, Self::Disconnected { .. })
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Ready => f.write_str("ready"),
            Self::Disconnected { reason } => write!(f, "disconnected ({reason:?})"),
        }
    }
}
