//! # LogWriter: lifecycle events rendered through `tracing`.
//!
//! ## Example output (with a `fmt` subscriber)
//! ```text
//! INFO  procvisor::events: spawned pid=4242 generation=1
//! INFO  procvisor::events: startup succeeded pid=4242
//! WARN  procvisor::events: crash detected reason="exit code 1" restart_count=0
//! INFO  procvisor::events: restart scheduled restart_count=1 delay_ms=3000
//! ERROR procvisor::events: max restarts reached restart_count=10 reason="health check failure"
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that logs every event with structured fields.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ProcessSpawned => {
                info!(target: "procvisor::events", pid = ?e.pid, generation = ?e.generation, "spawned");
            }
            EventKind::StartupSucceeded => {
                info!(target: "procvisor::events", pid = ?e.pid, "startup succeeded");
            }
            EventKind::StartupFailed => {
                warn!(target: "procvisor::events", reason, "startup failed");
            }
            EventKind::ProcessExited => {
                info!(target: "procvisor::events", code = ?e.exit_code, signal = ?e.signal, "process exited");
            }
            EventKind::PortReaped => {
                info!(target: "procvisor::events", pid = ?e.pid, port = ?e.port, "reaped stray process");
            }
            EventKind::CrashDetected => {
                warn!(target: "procvisor::events", reason, restart_count = ?e.restart_count, "crash detected");
            }
            EventKind::RecurringError => {
                warn!(target: "procvisor::events", count = ?e.attempt, line = reason, "recurring error");
            }
            EventKind::RestartScheduled => {
                info!(target: "procvisor::events", restart_count = ?e.restart_count, delay_ms = ?e.delay_ms, "restart scheduled");
            }
            EventKind::ServerRestarted => {
                info!(target: "procvisor::events", restart_count = ?e.restart_count, pid = ?e.pid, "server restarted");
            }
            EventKind::RestartFailed => {
                error!(target: "procvisor::events", restart_count = ?e.restart_count, reason, "restart failed");
            }
            EventKind::MaxRestartsReached => {
                error!(target: "procvisor::events", restart_count = ?e.restart_count, reason, "max restarts reached");
            }
            EventKind::FatalError => {
                error!(target: "procvisor::events", pid = ?e.pid, reason, "unrecoverable error, manual fix required");
            }
            EventKind::HealthCheckFailed => {
                warn!(target: "procvisor::events", reason, "health check failed");
            }
            EventKind::HealthRestored => {
                info!(target: "procvisor::events", reset_from = ?e.restart_count, "health restored");
            }
            EventKind::ShutdownRequested => {
                info!(target: "procvisor::events", "shutdown requested");
            }
            EventKind::Stopped => {
                info!(target: "procvisor::events", "stopped");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "procvisor::events", subscriber = ?e.subscriber, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "procvisor::events", subscriber = ?e.subscriber, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
