//! Set of sessions that have reached Ready.
//!
//! Its size is the waiting-for-client count. A session that never reaches
//! Ready is never added, and removal tolerates duplicate disconnects.

use std::collections::HashMap;

use gattbench_core::{DeviceId, SessionId};

/// Sessions currently in the Ready state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    ready: HashMap<SessionId, DeviceId>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session on Ready entry. Returns `false` if it was already present.
    pub fn on_ready(&mut self, session_id: SessionId, device: DeviceId) -> bool {
        self.ready.insert(session_id, device).is_none()
    }

    /// Remove a session on Disconnected entry. Returns `false` if it was absent.
    pub fn on_disconnected(&mut self, session_id: &SessionId) -> bool {
        self.ready.remove(session_id).is_some()
    }

    /// Registered session ids.
    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.ready.keys()
    }

    /// Number of ready sessions.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }
}
