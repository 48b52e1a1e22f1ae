//! Runtime core: the control loop and its public handle.
//!
//! The only public API from this module is [`Supervisor`] (with its
//! [`SupervisorBuilder`]) plus the [`Phase`]/[`StatusSnapshot`] types it reports.
//!
//! Internal modules:
//! - [`actor`]: the control loop owning the child, counters and timers;
//! - [`signal`]: commands and inputs consumed by the control loop;
//! - [`supervisor`]: cloneable handle sending commands to the loop;
//! - [`builder`]: wires capabilities, bus and subscribers;
//! - [`shutdown`]: OS termination signal handling.

mod actor;
mod builder;
mod shutdown;
mod signal;
mod status;
mod supervisor;

pub(crate) use signal::Signal;

pub use builder::SupervisorBuilder;
pub use status::{Phase, StatusSnapshot};
pub use supervisor::Supervisor;
