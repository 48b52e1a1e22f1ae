//! Restart policies.
//!
//! This module groups the knobs that control **whether** a crashed process is
//! restarted and **how long** to wait first.
//!
//! ## Contents
//! - [`RestartPolicy`]  restart bound + delay policy
//! - [`RestartTracker`] mutable counter and the health reset rule
//! - [`BackoffPolicy`]  delay per restart (constant by default)
//! - [`JitterPolicy`]   optional randomization of the delay
//!
//! ## Defaults
//! - `RestartPolicy::default()` → `max_restarts = 10`, constant 3s.
//! - `JitterPolicy::None`.

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::{HealthTransition, RestartDecision, RestartPolicy, RestartTracker};
