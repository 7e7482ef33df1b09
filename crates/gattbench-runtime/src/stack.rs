//! Capability traits for the external peripheral stack.
//!
//! The orchestrator never talks to a radio directly. A platform binding
//! implements these traits; [`crate::sim`] provides an in-process one.
//! Timeouts for individual exercises are the binding's responsibility.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use gattbench_core::{ConnectionState, DeviceId, StackError};

/// Advertising control.
#[async_trait]
pub trait Advertiser: Send + Sync {
    /// Start advertising; resolves once the stack confirms or rejects it.
    async fn start_advertising(&self) -> Result<(), StackError>;

    /// Stop advertising. Failures are the binding's to log.
    async fn stop_advertising(&self);
}

/// Lifecycle callbacks from the GATT server.
///
/// Called from arbitrary stack threads; implementations must not block.
pub trait ServerObserver: Send + Sync {
    /// Services are registered and the server accepts connections.
    fn on_server_ready(&self);

    /// A device connected to the server.
    fn on_device_connected(&self, device: DeviceId);

    /// A device disconnected from the server.
    fn on_device_disconnected(&self, device: DeviceId);
}

/// The GATT server.
pub trait GattServer: Send + Sync {
    /// Install the lifecycle observer. Must be called before [`GattServer::open`].
    fn set_observer(&self, observer: Arc<dyn ServerObserver>);

    /// Open the server.
    fn open(&self) -> Result<(), StackError>;

    /// Close the server, dropping every remaining link.
    fn close(&self);

    /// Bind a connection handle for `device` to this server.
    fn attach(&self, device: &DeviceId) -> Result<Arc<dyn ClientConnection>, StackError>;
}

/// One client's connection, as seen from the server.
///
/// Every exercise resolves to `Ok(())` on pass and `Err` on fail.
#[async_trait]
pub trait ClientConnection: Send + Sync {
    /// Peer address.
    fn device(&self) -> &DeviceId;

    /// Connection-state transitions, starting from the current state.
    ///
    /// Can be taken once; later calls yield an empty stream. The stream
    /// ends after [`ClientConnection::release`].
    fn state_stream(&self) -> BoxStream<'static, ConnectionState>;

    /// Connection handshake.
    async fn connect(&self) -> Result<(), StackError>;

    /// Single write exercise.
    async fn write(&self) -> Result<(), StackError>;

    /// Split write merged on the server.
    async fn write_merged(&self) -> Result<(), StackError>;

    /// Notification exercise.
    async fn subscribe_notification(&self) -> Result<(), StackError>;

    /// Indication exercise.
    async fn subscribe_indication(&self) -> Result<(), StackError>;

    /// Queued write committed or aborted as a unit.
    async fn reliable_write(&self) -> Result<(), StackError>;

    /// Release the handle. Idempotent.
    fn release(&self);
}
