//! # Event subscribers.
//!
//! ```text
//! control loop ── publish(Event) ──► Bus ──► supervisor listener ──► SubscriberSet
//!                                     │                                 ├──► LogWriter
//!                                     │                                 └──► user subscribers
//!                                     └──► Supervisor::subscribe() receivers
//! ```
//!
//! - [`Subscribe`] trait for custom handlers
//! - [`SubscriberSet`] per-subscriber queues and workers
//! - [`LogWriter`] structured logging of every event via `tracing`

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
