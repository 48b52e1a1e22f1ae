//! Messages consumed by the control loop.
//!
//! Commands come from the [`Supervisor`](crate::Supervisor) handle and carry a
//! reply channel. Inputs come from the process layer, timers and probe tasks
//! and carry the generation they were issued for.

use tokio::sync::oneshot;

use crate::core::status::StatusSnapshot;
use crate::error::StartError;
use crate::health::ProbeOutcome;
use crate::process::ExitInfo;

#[derive(Debug)]
pub(crate) enum Signal {
    // === Commands ===
    Start {
        reply: oneshot::Sender<Result<(), StartError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },

    // === Inputs ===
    Stdout {
        generation: u64,
        line: String,
    },
    Stderr {
        generation: u64,
        line: String,
    },
    Exited {
        generation: u64,
        info: ExitInfo,
    },
    StartupDeadline {
        generation: u64,
    },
    HealthTick {
        generation: u64,
    },
    HealthResult {
        generation: u64,
        outcome: ProbeOutcome,
    },
    RestartDue {
        generation: u64,
    },
}
