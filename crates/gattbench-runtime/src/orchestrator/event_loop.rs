//! The orchestrator's event loop.
//!
//! Every mutation of the record list, the registry, and the published view
//! happens here, one event at a time. Server callbacks and per-session
//! listeners only enqueue [`LoopEvent`]s.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use gattbench_core::{
    ConnectionState, DeviceId, HarnessEvent, ServerPhase, ServerViewState, SessionId, TestItem,
    TestOutcome,
};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::emitter::EventEmitter;
use crate::records::TestRecordStore;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionSession, SessionStreams, Transition};
use crate::stack::{Advertiser, GattServer, ServerObserver};

/// Input to the event loop.
pub(crate) enum LoopEvent {
    ServerReady,
    DeviceConnected(DeviceId),
    DeviceDisconnected(DeviceId),
    Outcome {
        session_id: SessionId,
        outcome: TestOutcome,
    },
    State {
        session_id: SessionId,
        state: ConnectionState,
    },
    SequenceFinished(SessionId),
    SessionFailed {
        session_id: SessionId,
        reason: String,
    },
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Server observer that forwards callbacks into the loop.
pub(crate) struct ObserverBridge {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl ObserverBridge {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: LoopEvent) {
        if self.tx.send(event).is_err() {
            debug!("server callback after orchestrator shutdown");
        }
    }
}

impl ServerObserver for ObserverBridge {
    fn on_server_ready(&self) {
        self.forward(LoopEvent::ServerReady);
    }

    fn on_device_connected(&self, device: DeviceId) {
        self.forward(LoopEvent::DeviceConnected(device));
    }

    fn on_device_disconnected(&self, device: DeviceId) {
        self.forward(LoopEvent::DeviceDisconnected(device));
    }
}

pub(crate) struct EventLoop {
    rx: mpsc::UnboundedReceiver<LoopEvent>,
    tx: mpsc::UnboundedSender<LoopEvent>,
    advertiser: Arc<dyn Advertiser>,
    server: Arc<dyn GattServer>,
    records: TestRecordStore,
    registry: SessionRegistry,
    sessions: HashMap<SessionId, ConnectionSession>,
    view: watch::Sender<ServerViewState>,
    emitter: Arc<EventEmitter>,
    outcome_buffer: usize,
}

impl EventLoop {
    pub(crate) fn new(
        advertiser: Arc<dyn Advertiser>,
        server: Arc<dyn GattServer>,
        view: watch::Sender<ServerViewState>,
        emitter: Arc<EventEmitter>,
        outcome_buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            tx,
            advertiser,
            server,
            records: TestRecordStore::new(),
            registry: SessionRegistry::new(),
            sessions: HashMap::new(),
            view,
            emitter,
            outcome_buffer,
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<LoopEvent> {
        self.tx.clone()
    }

    pub(crate) async fn run(mut self) {
        info!("event loop started");
        while let Some(event) = self.rx.recv().await {
            if let LoopEvent::Shutdown(ack) = event {
                self.teardown().await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return;
            }
            self.handle(event);
        }
    }

    fn handle(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::ServerReady => {
                info!("server ready");
                self.record(None, TestOutcome::passed(TestItem::ServerReady));
            }
            LoopEvent::DeviceConnected(device) => self.open_session(device),
            LoopEvent::DeviceDisconnected(device) => {
                info!(%device, "device disconnected from server");
                self.record(None, TestOutcome::passed(TestItem::DeviceDisconnection));
            }
            LoopEvent::Outcome {
                session_id,
                outcome,
            } => self.record(Some(session_id), outcome),
            LoopEvent::State { session_id, state } => self.fold_state(session_id, state),
            LoopEvent::SequenceFinished(session_id) => self.finish_sequence(&session_id),
            LoopEvent::SessionFailed { session_id, reason } => {
                error!(%session_id, %reason, "session failed");
                self.emitter.emit(HarnessEvent::SessionFailed {
                    session_id: session_id.clone(),
                    reason,
                });
                self.close_session(&session_id);
            }
            LoopEvent::Shutdown(_) => {}
        }
    }

    /// Fold one outcome into the record list and republish it.
    pub(crate) fn record(&mut self, session_id: Option<SessionId>, outcome: TestOutcome) {
        let result = if outcome.is_passed { "pass" } else { "fail" };
        counter!("gattbench_test_outcomes_total", "result" => result).increment(1);

        let change = self.records.apply(outcome.clone());
        debug!(test = %outcome.test_name, result, ?change, "outcome");
        if change.is_modified() {
            let items = self.records.records().to_vec();
            self.view.send_modify(|view| view.test_items = items);
        }
        self.emitter.emit(HarnessEvent::OutcomeRecorded {
            session_id,
            outcome,
        });
    }

    fn open_session(&mut self, device: DeviceId) {
        let activated =
            ConnectionSession::activate(self.server.as_ref(), device.clone(), self.outcome_buffer);
        let (session, streams) = match activated {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%device, error = %err, "could not attach session");
                self.record(None, TestOutcome::failed(TestItem::Connection));
                return;
            }
        };
        counter!("gattbench_sessions_total").increment(1);
        info!(session_id = %session.id(), %device, "session opened");

        self.spawn_listeners(&session, streams);
        let _ = self.sessions.insert(session.id().clone(), session);
    }

    /// Forward a session's streams into the loop and watch its task.
    fn spawn_listeners(&self, session: &ConnectionSession, streams: SessionStreams) {
        let SessionStreams {
            mut outcomes,
            mut states,
            task,
        } = streams;

        // Drained to the end. A session whose link dropped still scores its
        // remaining steps as failed.
        let tx = self.tx.clone();
        let session_id = session.id().clone();
        let _ = tokio::spawn(async move {
            while let Some(outcome) = outcomes.next().await {
                let event = LoopEvent::Outcome {
                    session_id: session_id.clone(),
                    outcome,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        let tx = self.tx.clone();
        let session_id = session.id().clone();
        let cancel = session.cancel_token();
        let _ = tokio::spawn(async move {
            loop {
                let state = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = states.next() => match next {
                        Some(state) => state,
                        None => break,
                    },
                };
                let event = LoopEvent::State {
                    session_id: session_id.clone(),
                    state,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        let tx = self.tx.clone();
        let session_id = session.id().clone();
        let _ = tokio::spawn(async move {
            let event = match task.await {
                Err(err) if err.is_panic() => LoopEvent::SessionFailed {
                    session_id,
                    reason: panic_reason(err),
                },
                _ => LoopEvent::SequenceFinished(session_id),
            };
            let _ = tx.send(event);
        });
    }

    fn fold_state(&mut self, session_id: SessionId, state: ConnectionState) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            debug!(%session_id, %state, "state for closed session");
            return;
        };
        let device = session.device().clone();
        let sequence_finished = session.sequence_finished();

        match session.observe(state) {
            Transition::Ignored => return,
            Transition::Ready => {
                info!(%session_id, %device, "session ready");
                if self.registry.on_ready(session_id.clone(), device.clone()) {
                    self.publish_count();
                }
            }
            Transition::Disconnected { reason, was_ready } => {
                if was_ready {
                    info!(%session_id, %device, ?reason, "session disconnected");
                } else {
                    warn!(%session_id, %device, ?reason, "disconnected before ready");
                }
                if self.registry.on_disconnected(&session_id) {
                    self.publish_count();
                }
                if sequence_finished {
                    self.drop_session(&session_id);
                }
            }
        }

        self.emitter.emit(HarnessEvent::SessionState {
            session_id,
            device,
            state,
        });
    }

    /// Note a session's exercise task ended. Once its link is also down the
    /// session is released.
    fn finish_sequence(&mut self, session_id: &SessionId) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        session.finish_sequence();
        let state = session.state();
        debug!(%session_id, %state, "sequence finished");
        if state.is_terminal() {
            self.drop_session(session_id);
        }
    }

    /// Drop a session from the registry and release it.
    fn close_session(&mut self, session_id: &SessionId) {
        if self.registry.on_disconnected(session_id) {
            self.publish_count();
        }
        self.drop_session(session_id);
    }

    fn drop_session(&mut self, session_id: &SessionId) {
        if let Some(mut session) = self.sessions.remove(session_id) {
            session.release();
        }
    }

    fn publish_count(&self) {
        let count = self.registry.ready_count();
        gauge!("gattbench_ready_clients").set(count as f64);
        self.view.send_modify(|view| {
            view.state = ServerPhase::WaitingForClient { count };
        });
        self.emitter.emit(HarnessEvent::ReadyCountChanged { count });
    }

    async fn teardown(&mut self) {
        info!(
            ready = self.registry.ready_count(),
            sessions = self.sessions.len(),
            "tearing down"
        );
        self.advertiser.stop_advertising().await;

        let registered: Vec<SessionId> = self.registry.session_ids().cloned().collect();
        for session_id in &registered {
            if let Some(mut session) = self.sessions.remove(session_id) {
                session.release();
            }
        }
        for (_, mut session) in self.sessions.drain() {
            session.release();
        }

        self.server.close();
        info!("orchestrator terminated");
    }
}

fn panic_reason(err: JoinError) -> String {
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "session task panicked".to_string()
}
