//! Supervisor events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the control loop (`core::actor`), `SubscriberSet` workers
//!   (overflow/panic), `Supervisor::run_until_signal` (shutdown).
//! - **Consumers**: the supervisor's subscriber listener (fans out to
//!   `SubscriberSet`) and receivers handed out by `Supervisor::subscribe`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
