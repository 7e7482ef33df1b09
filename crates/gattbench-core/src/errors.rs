//! Errors reported by the external peripheral stack.
//!
//! The stack is a collaborator, so its failures are carried as a single
//! [`StackError`] naming the operation that failed. Orchestration errors live
//! in `gattbench-runtime`.

use thiserror::Error;

/// Operation on the peripheral stack that can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackOperation {
    /// Start advertising.
    StartAdvertising,
    /// Open the GATT server.
    OpenServer,
    /// Attach a connection to the server.
    Attach,
    /// A protocol exercise on a client connection.
    Exercise,
}

impl StackOperation {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartAdvertising => "start_advertising",
            Self::OpenServer => "open_server",
            Self::Attach => "attach",
            Self::Exercise => "exercise",
        }
    }
}

/// Failure reported by the peripheral stack.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{} failed: {message}", operation.as_str())]
pub struct StackError {
    /// Which operation failed.
    pub operation: StackOperation,
    /// Stack-provided description.
    pub message: String,
}

impl StackError {
    /// Build an error for `operation`.
    pub fn new(operation: StackOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }

    /// Shorthand for a failed protocol exercise.
    pub fn exercise(message: impl Into<String>) -> Self {
        Self::new(StackOperation::Exercise, message)
    }
}
