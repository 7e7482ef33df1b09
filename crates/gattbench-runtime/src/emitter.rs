//! Diagnostics feed for [`HarnessEvent`]s.
//!
//! The event loop publishes here after every fold. Nothing in the harness
//! depends on a subscriber being present.

use gattbench_core::HarnessEvent;
use metrics::counter;
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of harness diagnostics to any number of observers.
///
/// `emit` never awaits. A slow observer lags and loses the oldest events
/// instead of stalling the event loop.
pub struct EventEmitter {
    tx: broadcast::Sender<HarnessEvent>,
}

impl EventEmitter {
    /// Emitter with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Emitter with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish `event` to current observers.
    pub fn emit(&self, event: HarnessEvent) {
        let event_type = event.event_type();
        counter!("gattbench_harness_events_total", "type" => event_type).increment(1);
        if self.tx.send(event).is_err() {
            trace!(event_type, "no diagnostics observers");
        }
    }

    /// Observer for every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
