//! # gattbench-runtime
//!
//! Connection sessions, result aggregation, and orchestration.
//!
//! - **Stack**: traits for the external peripheral stack (advertiser, GATT server, connections)
//! - **Records**: ordered, de-duplicated test outcome store
//! - **Session**: one client's fixed exercise sequence and state stream
//! - **Registry**: the set of sessions that reached Ready
//! - **Orchestrator**: single event loop folding server and session events into one view
//! - **Sim**: in-process simulated stack for the `gattbench` binary and tests
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: gattbench-core, gattbench-settings.
//! Depended on by: gattbench.

#![deny(unsafe_code)]

pub mod emitter;
pub mod errors;
pub mod orchestrator;
pub mod records;
pub mod registry;
pub mod session;
pub mod sim;
pub mod stack;

pub use emitter::EventEmitter;
pub use errors::RuntimeError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorHandle};
pub use records::{RecordChange, TestRecordStore};
pub use registry::SessionRegistry;
pub use session::{ConnectionSession, SessionStreams, Transition};
pub use stack::{Advertiser, ClientConnection, GattServer, ServerObserver};
