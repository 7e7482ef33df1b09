//! Orchestration of the server lifecycle and every connection session.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `orchestrator` | Startup (advertise, observe, open), handle, teardown request |
//! | `event_loop` | Single task folding server and session events into the view |
//!
//! ## Lifecycle
//!
//! `Init → Starting` when advertising is requested, `Starting → Running` once
//! the server reports ready, `Running → Terminated` on shutdown. Teardown stops
//! advertising, then releases sessions, then closes the server.

pub(crate) mod event_loop;
#[allow(clippy::module_inception)]
pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorHandle};
