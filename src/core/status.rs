//! Supervisor phase and point-in-time status.

use std::fmt;
use std::time::SystemTime;

/// Why the control loop stopped recovering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Halt {
    /// Restart budget spent; `reason` is the last crash.
    Exhausted { reason: String },
    /// The child asked for a manual fix.
    Unrecoverable { reason: String },
}

/// Lifecycle phase of the supervised process.
///
/// ```text
/// Idle ──start()──► Starting ──marker──► Healthy ──crash──► Restarting ──due──► Starting
///                      │                    │                                    │
///                      └─ fails ─► Idle     ├─ exit 0 ─► Exited                  └─ fails ─► Crashed
///                                           ├─ budget spent ─► Fatal
///                                           └─ unrecoverable stderr ─► Fatal
/// any ──stop()──► Stopped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// No process; `start()` not called yet or the first start failed.
    #[default]
    Idle,
    /// A process was spawned and its startup marker is awaited.
    Starting,
    /// Startup succeeded; health monitoring is active.
    Healthy,
    /// A restart attempt failed; monitoring continues until the next failure.
    Crashed,
    /// Waiting for the restart delay to elapse.
    Restarting,
    /// The process exited with code 0; nothing is restarted.
    Exited,
    /// `stop()` was called.
    Stopped,
    /// The restart budget is exhausted or the child reported an
    /// unrecoverable error. Terminal.
    Fatal,
}

impl Phase {
    /// Short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Healthy => "healthy",
            Phase::Crashed => "crashed",
            Phase::Restarting => "restarting",
            Phase::Exited => "exited",
            Phase::Stopped => "stopped",
            Phase::Fatal => "fatal",
        }
    }

    /// Returns `true` when a process is expected to be running.
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Starting | Phase::Healthy | Phase::Crashed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Snapshot returned by [`Supervisor::status`](crate::Supervisor::status).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub phase: Phase,
    /// Pid of the current child, if any.
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub recurring_error_count: u32,
    pub is_healthy: bool,
    /// Time of the last successful probe.
    pub last_healthy_at: Option<SystemTime>,
}
