//! # Lifecycle events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four groups:
//! - **Process events**: spawn, startup outcome, exit
//! - **Recovery events**: crash detection, restart scheduling and outcome, terminal state
//! - **Health events**: failed probes and restored health
//! - **Runtime events**: shutdown, stop, subscriber overflow/panic
//!
//! The [`Event`] struct carries optional metadata (pid, restart count, delay, reason...).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_restart_count(2)
//!     .with_delay(Duration::from_secs(3))
//!     .with_reason("exit code 1");
//!
//! assert_eq!(ev.kind, EventKind::RestartScheduled);
//! assert_eq!(ev.restart_count, Some(2));
//! assert_eq!(ev.delay_ms, Some(3000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Process events ===
    /// A child process was spawned.
    ///
    /// Sets: `pid` (if known), `generation`.
    ProcessSpawned,

    /// The child printed its startup marker.
    ///
    /// Sets: `pid`, `generation`.
    StartupSucceeded,

    /// A startup attempt failed (timeout, early exit, port in use, spawn error).
    ///
    /// Sets: `reason`, `generation`.
    StartupFailed,

    /// The child exited on its own after startup.
    ///
    /// Sets: `exit_code` / `signal`, `generation`.
    ProcessExited,

    /// A stray process bound to the service port was killed.
    ///
    /// Sets: `pid`, `port`.
    PortReaped,

    // === Recovery events ===
    /// A crash was detected and crash handling started.
    ///
    /// Sets: `reason`, `restart_count` (before increment).
    CrashDetected,

    /// One recurring error signature was observed on stdout.
    ///
    /// Sets: `attempt` (current counter value), `reason` (the line).
    RecurringError,

    /// A restart was scheduled after cleanup.
    ///
    /// Sets: `restart_count`, `delay_ms`, `reason`.
    RestartScheduled,

    /// A restarted process reported startup success.
    ///
    /// Sets: `restart_count`, `pid`.
    ServerRestarted,

    /// A restart attempt did not reach startup success.
    ///
    /// Sets: `restart_count`, `reason`.
    RestartFailed,

    /// Restart budget exhausted. Terminal.
    ///
    /// Sets: `restart_count`, `reason`.
    MaxRestartsReached,

    /// The child reported an error that a restart cannot fix. Terminal.
    ///
    /// Sets: `reason` (the stderr line), `pid`, `generation`.
    FatalError,

    // === Health events ===
    /// A health probe failed.
    ///
    /// Sets: `reason`, `generation`.
    HealthCheckFailed,

    /// A health probe succeeded after the service was considered unhealthy.
    ///
    /// Sets: `restart_count` (value before the reset), `generation`.
    HealthRestored,

    // === Runtime events ===
    /// OS termination signal observed by [`Supervisor::run_until_signal`](crate::Supervisor::run_until_signal).
    ShutdownRequested,

    /// The supervisor was stopped and the child cleaned up.
    Stopped,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `subscriber`, `reason`.
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `subscriber`, `reason`.
    SubscriberPanicked,
}

/// Supervisor event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Process generation the event belongs to.
    pub generation: Option<u64>,
    /// Child pid, if applicable.
    pub pid: Option<u32>,
    /// Service port, if applicable.
    pub port: Option<u16>,
    /// Restart counter value associated with the event.
    pub restart_count: Option<u32>,
    /// Generic counter (e.g. recurring error count).
    pub attempt: Option<u32>,
    /// Delay before the next action in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Exit code of the child.
    pub exit_code: Option<i32>,
    /// Terminating signal of the child.
    pub signal: Option<i32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Subscriber name for overflow/panic events.
    pub subscriber: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            generation: None,
            pid: None,
            port: None,
            restart_count: None,
            attempt: None,
            delay_ms: None,
            exit_code: None,
            signal: None,
            reason: None,
            subscriber: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the process generation.
    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Attaches a pid (ignored when `None`).
    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attaches the service port.
    #[inline]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Attaches the restart counter.
    #[inline]
    pub fn with_restart_count(mut self, n: u32) -> Self {
        self.restart_count = Some(n);
        self
    }

    /// Attaches a generic counter.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches exit code and signal of a finished child.
    #[inline]
    pub fn with_exit(mut self, code: Option<i32>, signal: Option<i32>) -> Self {
        self.exit_code = code;
        self.signal = signal;
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Returns the delay as a [`Duration`], if set.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Returns `true` for the terminal [`EventKind::MaxRestartsReached`].
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, EventKind::MaxRestartsReached)
    }
}
