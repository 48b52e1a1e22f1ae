//! # Timer abstraction.
//!
//! The control loop never sleeps on its own: every timed reaction (startup
//! deadline, health ticks, restart delay) is registered with a [`Scheduler`]
//! which later runs a small job, typically "post this signal to the loop".
//!
//! ```text
//! Scheduler::after(delay, job)          ──► job() once      ─┐
//! Scheduler::every(first, period, job)  ──► job() repeatedly ├─► TimerHandle::cancel()
//!                                                            ─┘   (or drop)
//! ```
//!
//! ## Rules
//! - Dropping a [`TimerHandle`] cancels the timer.
//! - A job that already fired may still have posted its signal; consumers tag
//!   signals with a generation to discard late arrivals.
//! - [`TokioScheduler`] uses `tokio::time`, so tests can drive it with paused time.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One-shot job.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Repeating job.
pub type RepeatJob = Arc<dyn Fn() + Send + Sync + 'static>;

/// Schedules one-shot and repeating jobs with explicit cancellation.
pub trait Scheduler: Send + Sync + 'static {
    /// Runs `job` once after `delay`.
    fn after(&self, delay: Duration, job: Job) -> TimerHandle;

    /// Runs `job` after `first`, then every `period`.
    fn every(&self, first: Duration, period: Duration, job: RepeatJob) -> TimerHandle;
}

/// Cancellation handle for a scheduled job. Cancels on drop.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Wraps a token; cancelling it must stop the job.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stops the timer. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called (or the handle dropped a clone).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// [`Scheduler`] backed by `tokio::time` and spawned tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, job: Job) -> TimerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = time::sleep(delay) => job(),
            }
        });
        TimerHandle::new(token)
    }

    fn every(&self, first: Duration, period: Duration, job: RepeatJob) -> TimerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + first, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticks.tick() => job(),
                }
            }
        });
        TimerHandle::new(token)
    }
}
