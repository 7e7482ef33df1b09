//! Orchestrator startup and the handle that owns the running loop.

use std::sync::Arc;

use gattbench_core::{HarnessEvent, ServerViewState, TestItem, TestOutcome};
use gattbench_settings::OrchestratorSettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, instrument};

use crate::emitter::{DEFAULT_CAPACITY, EventEmitter};
use crate::errors::RuntimeError;
use crate::orchestrator::event_loop::{EventLoop, LoopEvent, ObserverBridge};
use crate::stack::{Advertiser, GattServer};

/// Orchestrator tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Per-session bound on outcomes waiting to be folded.
    pub outcome_buffer: usize,
    /// Capacity of the diagnostics broadcast channel.
    pub emitter_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            outcome_buffer: 16,
            emitter_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            outcome_buffer: settings.outcome_buffer,
            emitter_capacity: settings.emitter_capacity,
        }
    }
}

/// Server-side test orchestrator.
///
/// Owns the record list, the session registry, and every session through its
/// event loop. Observers read [`ServerViewState`] through a watch channel.
pub struct Orchestrator {
    advertiser: Arc<dyn Advertiser>,
    server: Arc<dyn GattServer>,
    config: OrchestratorConfig,
    emitter: Arc<EventEmitter>,
    view: watch::Sender<ServerViewState>,
}

impl Orchestrator {
    /// Create an orchestrator over the given stack capabilities.
    pub fn new(
        advertiser: Arc<dyn Advertiser>,
        server: Arc<dyn GattServer>,
        config: OrchestratorConfig,
    ) -> Self {
        let (view, _) = watch::channel(ServerViewState::default());
        Self {
            advertiser,
            server,
            config,
            emitter: Arc::new(EventEmitter::with_capacity(config.emitter_capacity)),
            view,
        }
    }

    /// Create an orchestrator over a stack providing both capabilities.
    pub fn with_stack<S>(stack: Arc<S>, config: OrchestratorConfig) -> Self
    where
        S: Advertiser + GattServer + 'static,
    {
        Self::new(stack.clone(), stack, config)
    }

    /// Watch the published view. Works before [`Orchestrator::start`].
    pub fn subscribe(&self) -> watch::Receiver<ServerViewState> {
        self.view.subscribe()
    }

    /// Diagnostics events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<HarnessEvent> {
        self.emitter.subscribe()
    }

    /// Start advertising, install the server observer, open the server, and
    /// spawn the event loop.
    ///
    /// The advertising result is recorded either way. On failure the
    /// recorded list stays visible through [`Orchestrator::subscribe`]
    /// receivers taken beforehand.
    #[instrument(skip(self))]
    pub async fn start(self) -> Result<OrchestratorHandle, RuntimeError> {
        let mut event_loop = EventLoop::new(
            Arc::clone(&self.advertiser),
            Arc::clone(&self.server),
            self.view.clone(),
            Arc::clone(&self.emitter),
            self.config.outcome_buffer,
        );

        let advertised = self.advertiser.start_advertising().await;
        event_loop.record(
            None,
            TestOutcome::new(TestItem::StartAdvertising.name(), advertised.is_ok()),
        );
        if let Err(source) = advertised {
            error!(error = %source, "could not start advertising");
            return Err(RuntimeError::Startup { source });
        }
        info!("advertising started");

        let tx = event_loop.sender();
        self.server
            .set_observer(Arc::new(ObserverBridge::new(tx.clone())));
        if let Err(source) = self.server.open() {
            error!(error = %source, "could not open GATT server");
            self.advertiser.stop_advertising().await;
            return Err(RuntimeError::ServerOpen { source });
        }

        let task = tokio::spawn(event_loop.run().instrument(info_span!("orchestrator")));
        Ok(OrchestratorHandle {
            tx,
            view: self.view.subscribe(),
            emitter: self.emitter,
            task: Some(task),
        })
    }
}

/// Handle to a running orchestrator.
///
/// Dropping it requests teardown without waiting for it.
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<LoopEvent>,
    view: watch::Receiver<ServerViewState>,
    emitter: Arc<EventEmitter>,
    task: Option<JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Snapshot of the current view.
    pub fn view(&self) -> ServerViewState {
        self.view.borrow().clone()
    }

    /// Watch the published view.
    pub fn subscribe(&self) -> watch::Receiver<ServerViewState> {
        self.view.clone()
    }

    /// Diagnostics events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<HarnessEvent> {
        self.emitter.subscribe()
    }

    /// Whether the event loop still accepts events.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop advertising, release every session, close the server, and wait
    /// for the event loop to exit.
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) -> Result<(), RuntimeError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(LoopEvent::Shutdown(Some(ack_tx)))
            .map_err(|_| RuntimeError::LoopClosed)?;
        ack_rx.await.map_err(|_| RuntimeError::LoopClosed)?;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| RuntimeError::Internal(err.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(LoopEvent::Shutdown(None));
        }
    }
}
