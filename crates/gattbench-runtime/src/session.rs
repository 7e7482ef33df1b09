//! One client's connection session.
//!
//! A session binds a connected device to the server, runs the fixed exercise
//! sequence as its own task, and hands the orchestrator two streams: scored
//! outcomes and connection-state transitions. Sessions never touch shared
//! state; the orchestrator folds what they emit.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use gattbench_core::{
    ConnectionState, DeviceId, DisconnectReason, SessionId, StackError, TestItem, TestOutcome,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::stack::{ClientConnection, GattServer};

/// Streams produced by [`ConnectionSession::activate`].
pub struct SessionStreams {
    /// One outcome per exercise, in sequence order. Ends when the sequence
    /// finishes or the session is released.
    pub outcomes: BoxStream<'static, TestOutcome>,
    /// Connection-state transitions reported by the stack.
    pub states: BoxStream<'static, ConnectionState>,
    /// The sequence task. Resolves to a panic error if an exercise panicked.
    pub task: JoinHandle<()>,
}

/// Effect of folding one state transition into a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Entered Ready.
    Ready,
    /// Entered Disconnected.
    Disconnected {
        /// Reason reported by the stack.
        reason: DisconnectReason,
        /// Whether the session had reached Ready first.
        was_ready: bool,
    },
    /// Repeated or out-of-order state; nothing changed.
    Ignored,
}

/// A device's session with the server.
pub struct ConnectionSession {
    id: SessionId,
    device: DeviceId,
    connection: Arc<dyn ClientConnection>,
    cancel: CancellationToken,
    released: bool,
    sequence_finished: bool,
    state: ConnectionState,
}

impl ConnectionSession {
    /// Attach `device` to `server` and start the exercise sequence.
    ///
    /// The state stream is taken before the sequence starts so no transition
    /// is missed. `outcome_buffer` bounds outcomes not yet folded.
    pub fn activate(
        server: &dyn GattServer,
        device: DeviceId,
        outcome_buffer: usize,
    ) -> Result<(Self, SessionStreams), StackError> {
        let connection = server.attach(&device)?;
        let id = SessionId::new();
        let cancel = CancellationToken::new();

        let states = connection.state_stream();
        let (tx, rx) = mpsc::channel(outcome_buffer.max(1));
        let span = info_span!("session", session_id = %id, device = %device);
        let task = tokio::spawn(
            run_sequence(Arc::clone(&connection), tx, cancel.clone()).instrument(span),
        );

        let session = Self {
            id,
            device,
            connection,
            cancel,
            released: false,
            sequence_finished: false,
            state: ConnectionState::Connecting,
        };
        let streams = SessionStreams {
            outcomes: ReceiverStream::new(rx).boxed(),
            states,
            task,
        };
        Ok((session, streams))
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Peer device.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Last state folded through [`ConnectionSession::observe`].
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Token cancelled on release. Listeners select on it to unsubscribe.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the exercise task has ended.
    pub fn sequence_finished(&self) -> bool {
        self.sequence_finished
    }

    /// Note that the exercise task has ended.
    pub fn finish_sequence(&mut self) {
        self.sequence_finished = true;
    }

    /// Fold a reported state and classify the transition.
    pub fn observe(&mut self, next: ConnectionState) -> Transition {
        if !self.state.can_transition_to(next) {
            return Transition::Ignored;
        }
        let was_ready = self.state == ConnectionState::Ready;
        self.state = next;
        match next {
            ConnectionState::Ready => Transition::Ready,
            ConnectionState::Disconnected { reason } => {
                Transition::Disconnected { reason, was_ready }
            }
            ConnectionState::Connecting => Transition::Ignored,
        }
    }

    /// Cancel the in-flight exercise and release the connection handle.
    ///
    /// Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        debug!(session_id = %self.id, device = %self.device, "releasing session");
        self.cancel.cancel();
        self.connection.release();
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("state", &self.state)
            .field("released", &self.released)
            .field("sequence_finished", &self.sequence_finished)
            .finish_non_exhaustive()
    }
}

/// Run every exercise in order, scoring each one.
async fn run_sequence(
    connection: Arc<dyn ClientConnection>,
    tx: mpsc::Sender<TestOutcome>,
    cancel: CancellationToken,
) {
    for item in TestItem::SESSION_SEQUENCE {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(step = item.key(), "sequence cancelled");
                return;
            }
            result = exercise(connection.as_ref(), item) => result,
        };

        let is_passed = match result {
            Ok(()) => true,
            Err(err) => {
                warn!(step = item.key(), error = %err, "exercise failed");
                false
            }
        };
        if tx.send(TestOutcome::new(item.name(), is_passed)).await.is_err() {
            return;
        }
    }
    debug!("sequence complete");
}

async fn exercise(connection: &dyn ClientConnection, item: TestItem) -> Result<(), StackError> {
    match item {
        TestItem::Connection => connection.connect().await,
        TestItem::Write => connection.write().await,
        TestItem::WriteWithMerger => connection.write_merged().await,
        TestItem::Notification => connection.subscribe_notification().await,
        TestItem::Indication => connection.subscribe_indication().await,
        TestItem::ReliableWrite => connection.reliable_write().await,
        TestItem::StartAdvertising | TestItem::ServerReady | TestItem::DeviceDisconnection => {
            Err(StackError::exercise(format!("{item} is not a session exercise")))
        }
    }
}
