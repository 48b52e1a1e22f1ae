//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for reacting to supervisor events
//! (alerting, metrics, an external process manager...).
//!
//! Each subscriber gets a dedicated worker task and a bounded queue. A slow
//! subscriber only affects its own queue; overflow drops the event for that
//! subscriber and publishes `EventKind::SubscriberOverflow`. Panics are caught
//! and published as `EventKind::SubscriberPanicked`.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use procvisor::{Event, EventKind, Subscribe};
//!
//! struct Pager;
//!
//! #[async_trait]
//! impl Subscribe for Pager {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::MaxRestartsReached {
//!             // page the on-call
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "pager" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Supervisor event subscriber.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event. Events arrive in FIFO order per subscriber.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this subscriber (clamped to a minimum of 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
