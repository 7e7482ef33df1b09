//! Test outcomes and the well-known test identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Latest pass/fail result for one named test.
///
/// Identity is `test_name`: a record list holds at most one outcome per name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    /// Test identifier, usually a [`TestItem`] display name.
    pub test_name: String,
    /// Whether the test passed.
    pub is_passed: bool,
}

impl TestOutcome {
    /// Build an outcome for an arbitrary test name.
    pub fn new(test_name: impl Into<String>, is_passed: bool) -> Self {
        Self {
            test_name: test_name.into(),
            is_passed,
        }
    }

    /// Passing outcome for a well-known item.
    pub fn passed(item: TestItem) -> Self {
        Self::new(item.name(), true)
    }

    /// Failing outcome for a well-known item.
    pub fn failed(item: TestItem) -> Self {
        Self::new(item.name(), false)
    }
}

/// Well-known tests recorded by the orchestrator and by every session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestItem {
    /// Advertising started.
    StartAdvertising,
    /// GATT server reported ready.
    ServerReady,
    /// A device disconnected from the server.
    DeviceDisconnection,
    /// Connection handshake with a client.
    Connection,
    /// Single characteristic write.
    Write,
    /// Write split into chunks and merged on the server.
    WriteWithMerger,
    /// Notification delivered to the client.
    Notification,
    /// Indication delivered and acknowledged by the client.
    Indication,
    /// Queued write committed or aborted as a unit.
    ReliableWrite,
}

impl TestItem {
    /// Every known item.
    pub const ALL: [TestItem; 9] = [
        TestItem::StartAdvertising,
        TestItem::ServerReady,
        TestItem::DeviceDisconnection,
        TestItem::Connection,
        TestItem::Write,
        TestItem::WriteWithMerger,
        TestItem::Notification,
        TestItem::Indication,
        TestItem::ReliableWrite,
    ];

    /// Exercises every connection session runs, in order.
    pub const SESSION_SEQUENCE: [TestItem; 6] = [
        TestItem::Connection,
        TestItem::Write,
        TestItem::WriteWithMerger,
        TestItem::Notification,
        TestItem::Indication,
        TestItem::ReliableWrite,
    ];

    /// Display name used as the record key.
    pub fn name(self) -> &'static str {
        match self {
            Self::StartAdvertising => "Start advertising",
            Self::ServerReady => "Server ready",
            Self::DeviceDisconnection => "Device disconnected",
            Self::Connection => "Connection",
            Self::Write => "Write",
            Self::WriteWithMerger => "Write with merger",
            Self::Notification => "Notification",
            Self::Indication => "Indication",
            Self::ReliableWrite => "Reliable write",
        }
    }

    /// Stable snake_case key, as used in settings files.
    pub fn key(self) -> &'static str {
        match self {
            Self::StartAdvertising => "start_advertising",
            Self::ServerReady => "server_ready",
            Self::DeviceDisconnection => "device_disconnection",
            Self::Connection => "connection",
            Self::Write => "write",
            Self::WriteWithMerger => "write_with_merger",
            Self::Notification => "notification",
            Self::Indication => "indication",
            Self::ReliableWrite => "reliable_write",
        }
    }

    /// Look up an item by its key (`write_with_merger`) or display name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|item| item.key() == value || item.name().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for TestItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
