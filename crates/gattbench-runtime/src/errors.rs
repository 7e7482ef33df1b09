//! Runtime error types.

use gattbench_core::StackError;

/// Errors surfaced by the orchestrator to its owner.
///
/// Step failures never appear here: they are scored as failing outcomes.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Advertising could not start; the orchestrator never reached Running.
    #[error("Could not start server: {source}")]
    Startup {
        /// Stack failure that caused it.
        #[source]
        source: StackError,
    },

    /// The GATT server could not be opened after advertising started.
    #[error("Could not open GATT server: {source}")]
    ServerOpen {
        /// Stack failure that caused it.
        #[source]
        source: StackError,
    },

    /// The event loop is no longer running.
    #[error("Orchestrator event loop closed")]
    LoopClosed,

    /// Internal / unexpected error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::Startup { .. } => "startup",
            Self::ServerOpen { .. } => "server_open",
            Self::LoopClosed => "loop_closed",
            Self::Internal(_) => "internal",
        }
    }
}
