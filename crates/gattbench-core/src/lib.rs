//! # gattbench-core
//!
//! Foundation types, identifiers, errors, and logging for the gattbench harness.
//!
//! This crate provides the shared vocabulary the other gattbench crates depend on:
//!
//! - **Identifiers**: [`ids::SessionId`] (UUID v7) and [`ids::DeviceId`] (peer address)
//! - **Outcomes**: [`outcome::TestOutcome`] and the well-known [`outcome::TestItem`] names
//! - **Connection states**: [`connection::ConnectionState`] with disconnect reasons
//! - **View**: [`view::ServerViewState`] published to observers
//! - **Errors**: [`errors::StackError`] for failures reported by the peripheral stack
//! - **Events**: [`events::HarnessEvent`] for diagnostics subscribers
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other gattbench crates.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod outcome;
pub mod view;

pub use connection::{ConnectionState, DisconnectReason};
pub use errors::StackError;
pub use events::HarnessEvent;
pub use ids::{DeviceId, SessionId};
pub use outcome::{TestItem, TestOutcome};
pub use view::{ServerPhase, ServerViewState};
