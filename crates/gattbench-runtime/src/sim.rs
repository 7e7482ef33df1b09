//! In-process simulated peripheral stack.
//!
//! Implements every stack trait against scripted clients so the harness can
//! run without a radio. Each call is appended to a call log, which tests use
//! to check ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use gattbench_core::errors::StackOperation;
use gattbench_core::{ConnectionState, DeviceId, DisconnectReason, StackError, TestItem};
use gattbench_settings::{SettingsError, SimulatorSettings};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::stack::{Advertiser, ClientConnection, GattServer, ServerObserver};

/// Stack-wide behaviour.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Latency of every exercise.
    pub step_latency: Duration,
    /// Exercises every client fails.
    pub failing: HashSet<TestItem>,
    /// Reject advertising start.
    pub fail_advertising: bool,
    /// Reject server open.
    pub fail_open: bool,
    /// Report server ready as soon as the server opens.
    pub auto_ready: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step_latency: Duration::from_millis(20),
            failing: HashSet::new(),
            fail_advertising: false,
            fail_open: false,
            auto_ready: true,
        }
    }
}

impl TryFrom<&SimulatorSettings> for SimConfig {
    type Error = SettingsError;

    fn try_from(settings: &SimulatorSettings) -> Result<Self, Self::Error> {
        Ok(Self {
            step_latency: Duration::from_millis(settings.step_latency_ms),
            failing: settings.failing_items()?.into_iter().collect(),
            ..Self::default()
        })
    }
}

/// Per-client behaviour.
#[derive(Clone, Debug, Default)]
pub struct ClientProfile {
    /// Exercises this client fails, on top of [`SimConfig::failing`].
    pub failing: HashSet<TestItem>,
    /// Lose the link during the handshake, before Ready.
    pub drop_before_ready: bool,
    /// Panic inside this exercise.
    pub panic_on: Option<TestItem>,
    /// Exercise latency for this client, overriding [`SimConfig::step_latency`].
    pub latency: Option<Duration>,
}

/// One call made into the stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackCall {
    /// [`Advertiser::start_advertising`].
    StartAdvertising,
    /// [`Advertiser::stop_advertising`].
    StopAdvertising,
    /// [`GattServer::set_observer`].
    SetObserver,
    /// [`GattServer::open`].
    Open,
    /// [`GattServer::close`].
    Close,
    /// [`GattServer::attach`].
    Attach(DeviceId),
    /// First [`ClientConnection::release`] of a device's handle.
    Release(DeviceId),
    /// An exercise started on a device.
    Exercise(DeviceId, TestItem),
}

struct Shared {
    calls: Mutex<Vec<StackCall>>,
    finished: watch::Sender<usize>,
}

impl Shared {
    fn record(&self, call: StackCall) {
        self.calls.lock().push(call);
    }
}

struct Inner {
    config: SimConfig,
    shared: Arc<Shared>,
    observer: Mutex<Option<Arc<dyn ServerObserver>>>,
    profiles: Mutex<HashMap<DeviceId, ClientProfile>>,
    links: Mutex<Vec<Arc<SimLink>>>,
}

/// Simulated advertiser, GATT server, and clients.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedStack {
    inner: Arc<Inner>,
}

impl SimulatedStack {
    /// Stack with the given behaviour.
    pub fn new(config: SimConfig) -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                shared: Arc::new(Shared {
                    calls: Mutex::new(Vec::new()),
                    finished,
                }),
                observer: Mutex::new(None),
                profiles: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make `device` attachable without announcing it.
    pub fn register_client(&self, device: &DeviceId, profile: ClientProfile) {
        let _ = self.inner.profiles.lock().insert(device.clone(), profile);
    }

    /// A well-behaved client connects.
    pub fn connect_client(&self, device: impl Into<String>) -> DeviceId {
        self.connect_client_with(device, ClientProfile::default())
    }

    /// A client with `profile` connects.
    pub fn connect_client_with(
        &self,
        device: impl Into<String>,
        profile: ClientProfile,
    ) -> DeviceId {
        let device = DeviceId::new(device);
        self.register_client(&device, profile);
        if let Some(observer) = self.observer() {
            observer.on_device_connected(device.clone());
        }
        device
    }

    /// The server announces `device` without making it attachable.
    pub fn announce_client(&self, device: &DeviceId) {
        if let Some(observer) = self.observer() {
            observer.on_device_connected(device.clone());
        }
    }

    /// `device` drops every live link and the server reports the disconnect.
    pub fn disconnect_client(&self, device: &DeviceId, reason: DisconnectReason) {
        let links: Vec<Arc<SimLink>> = self
            .inner
            .links
            .lock()
            .iter()
            .filter(|link| &link.device == device)
            .cloned()
            .collect();
        for link in links {
            link.drop_link(reason);
        }
        if let Some(observer) = self.observer() {
            observer.on_device_disconnected(device.clone());
        }
    }

    /// Report server ready, for stacks built with `auto_ready: false`.
    pub fn server_ready(&self) {
        if let Some(observer) = self.observer() {
            observer.on_server_ready();
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StackCall> {
        self.inner.shared.calls.lock().clone()
    }

    /// Number of exercise sequences that reached their last step.
    pub fn finished_sequences(&self) -> usize {
        *self.inner.shared.finished.borrow()
    }

    /// Wait until `count` sequences have reached their last step.
    pub async fn wait_for_sequences(&self, count: usize) {
        let mut rx = self.inner.shared.finished.subscribe();
        let _ = rx.wait_for(|finished| *finished >= count).await;
    }

    fn observer(&self) -> Option<Arc<dyn ServerObserver>> {
        self.inner.observer.lock().clone()
    }
}

impl Default for SimulatedStack {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[async_trait]
impl Advertiser for SimulatedStack {
    async fn start_advertising(&self) -> Result<(), StackError> {
        self.inner.shared.record(StackCall::StartAdvertising);
        if self.inner.config.fail_advertising {
            return Err(StackError::new(
                StackOperation::StartAdvertising,
                "advertising rejected by controller",
            ));
        }
        Ok(())
    }

    async fn stop_advertising(&self) {
        self.inner.shared.record(StackCall::StopAdvertising);
    }
}

impl GattServer for SimulatedStack {
    fn set_observer(&self, observer: Arc<dyn ServerObserver>) {
        self.inner.shared.record(StackCall::SetObserver);
        *self.inner.observer.lock() = Some(observer);
    }

    fn open(&self) -> Result<(), StackError> {
        self.inner.shared.record(StackCall::Open);
        if self.inner.config.fail_open {
            return Err(StackError::new(StackOperation::OpenServer, "no GATT services"));
        }
        if self.inner.config.auto_ready {
            self.server_ready();
        }
        Ok(())
    }

    fn close(&self) {
        self.inner.shared.record(StackCall::Close);
        let links = std::mem::take(&mut *self.inner.links.lock());
        for link in links {
            link.drop_link(DisconnectReason::TerminateLocalHost);
        }
    }

    fn attach(&self, device: &DeviceId) -> Result<Arc<dyn ClientConnection>, StackError> {
        self.inner.shared.record(StackCall::Attach(device.clone()));
        let Some(mut profile) = self.inner.profiles.lock().get(device).cloned() else {
            return Err(StackError::new(
                StackOperation::Attach,
                format!("unknown device {device}"),
            ));
        };
        profile.failing.extend(self.inner.config.failing.iter().copied());
        let latency = profile.latency.unwrap_or(self.inner.config.step_latency);

        let link = Arc::new(SimLink::new(
            device.clone(),
            profile,
            latency,
            Arc::clone(&self.inner.shared),
        ));
        self.inner.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}

struct LinkState {
    current: ConnectionState,
    tx: Option<mpsc::UnboundedSender<ConnectionState>>,
    rx: Option<mpsc::UnboundedReceiver<ConnectionState>>,
}

/// One simulated client link.
struct SimLink {
    device: DeviceId,
    profile: ClientProfile,
    latency: Duration,
    shared: Arc<Shared>,
    released: AtomicBool,
    state: Mutex<LinkState>,
}

impl SimLink {
    fn new(
        device: DeviceId,
        profile: ClientProfile,
        latency: Duration,
        shared: Arc<Shared>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ConnectionState::Connecting);
        Self {
            device,
            profile,
            latency,
            shared,
            released: AtomicBool::new(false),
            state: Mutex::new(LinkState {
                current: ConnectionState::Connecting,
                tx: Some(tx),
                rx: Some(rx),
            }),
        }
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if !state.current.can_transition_to(next) {
            return;
        }
        state.current = next;
        if let Some(tx) = &state.tx {
            let _ = tx.send(next);
        }
    }

    fn drop_link(&self, reason: DisconnectReason) {
        self.transition(ConnectionState::Disconnected { reason });
    }

    fn is_down(&self) -> bool {
        self.state.lock().current.is_terminal()
    }

    async fn step(&self, item: TestItem) -> Result<(), StackError> {
        self.shared
            .record(StackCall::Exercise(self.device.clone(), item));
        if self.profile.panic_on == Some(item) {
            panic!("simulated fault in {item} on {}", self.device);
        }
        tokio::time::sleep(self.latency).await;

        let result = if self.is_down() {
            Err(StackError::exercise(format!("{item}: link to {} is down", self.device)))
        } else if self.profile.failing.contains(&item) {
            Err(StackError::exercise(format!("{item}: rejected by {}", self.device)))
        } else {
            Ok(())
        };
        if item == TestItem::ReliableWrite {
            self.shared.finished.send_modify(|finished| *finished += 1);
        }
        result
    }
}

#[async_trait]
impl ClientConnection for SimLink {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    fn state_stream(&self) -> BoxStream<'static, ConnectionState> {
        match self.state.lock().rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    async fn connect(&self) -> Result<(), StackError> {
        self.shared
            .record(StackCall::Exercise(self.device.clone(), TestItem::Connection));
        if self.profile.panic_on == Some(TestItem::Connection) {
            panic!("simulated fault in handshake on {}", self.device);
        }
        tokio::time::sleep(self.latency).await;

        if self.profile.drop_before_ready {
            self.drop_link(DisconnectReason::LinkLoss);
            return Err(StackError::exercise(format!(
                "{} lost link during handshake",
                self.device
            )));
        }
        if self.profile.failing.contains(&TestItem::Connection) {
            self.drop_link(DisconnectReason::Timeout);
            return Err(StackError::exercise(format!("{} handshake timed out", self.device)));
        }
        if self.is_down() {
            return Err(StackError::exercise(format!("link to {} is down", self.device)));
        }
        self.transition(ConnectionState::Ready);
        Ok(())
    }

    async fn write(&self) -> Result<(), StackError> {
        self.step(TestItem::Write).await
    }

    async fn write_merged(&self) -> Result<(), StackError> {
        self.step(TestItem::WriteWithMerger).await
    }

    async fn subscribe_notification(&self) -> Result<(), StackError> {
        self.step(TestItem::Notification).await
    }

    async fn subscribe_indication(&self) -> Result<(), StackError> {
        self.step(TestItem::Indication).await
    }

    async fn reliable_write(&self) -> Result<(), StackError> {
        self.step(TestItem::ReliableWrite).await
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.record(StackCall::Release(self.device.clone()));
        debug!(device = %self.device, "link released");
        let mut state = self.state.lock();
        if !state.current.is_terminal() {
            state.current = ConnectionState::Disconnected {
                reason: DisconnectReason::Success,
            };
        }
        state.tx = None;
    }
}
