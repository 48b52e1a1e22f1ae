//! # procvisor
//!
//! **Procvisor** is a watchdog that keeps exactly one local service process
//! (typically an HTTP server) alive.
//!
//! It spawns the process, watches its output for a startup marker and for a
//! recurring error signature, polls a health endpoint on a schedule, and
//! restarts the process under a bounded-retry policy when it crashes, fails a
//! health check or keeps printing the same error.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!   │   Spawner    │  │ HealthProbe  │  │  PortReaper  │  │  Scheduler   │
//!   │ (tokio proc) │  │  (reqwest)   │  │    (lsof)    │  │ (tokio time) │
//!   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!          ▼                 ▼                 ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  ControlLoop (single task, owns RuntimeState)                         │
//! │  - process handle, generation                                         │
//! │  - RestartTracker (count, is_healthy)                                 │
//! │  - OutputClassifier (startup marker, recurring error counter)         │
//! │  - startup / health / restart timers                                  │
//! └──────▲──────────────────────────────────────────────────────┬─────────┘
//!        │ Signal (commands + generation-tagged inputs)         │ publish(Event)
//!        │                                                      ▼
//! ┌──────┴───────┐                          ┌──────────────────────────────┐
//! │  Supervisor  │ start/stop/status        │   Bus (broadcast channel)    │
//! │   (handle)   │◄── subscribe() ──────────┤ capacity: cfg.bus_capacity   │
//! └──────────────┘                          └──────────────┬───────────────┘
//!                                                          ▼
//!                                              ┌────────────────────────┐
//!                                              │  subscriber_listener   │
//!                                              └───────────┬────────────┘
//!                                                          ▼
//!                                                    SubscriberSet
//!                                                  (per-sub queues)
//!                                               ┌──────────┼──────────┐
//!                                               ▼          ▼          ▼
//!                                           LogWriter   worker2    workerN
//! ```
//!
//! ### Lifecycle
//! ```text
//! Idle ──start()──► Starting ──"Server running"──► Healthy
//!                      │                              │
//!                      │ timeout / exit / EADDRINUSE  │ exit != 0 | 3× recurring error | failed probe
//!                      ▼                              ▼
//!                 Err(StartError), Idle         handle_crash(reason)
//!                                                 ├─ restart_count < max ─► Restarting ─(delay)─► Starting
//!                                                 └─ otherwise            ─► Fatal (MaxRestartsReached)
//!
//! "cannot find module" on stderr ─► Fatal (FatalError), never restarted
//! "out of memory" on stderr      ─► handle_crash(line)
//!
//! Startup marker ─► healthy; restart_count is kept
//! Passing probe after a failure (e.g. a failed restart) ─► HealthRestored, restart_count := 0
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                           |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Start, stop, status, terminal state.                         | [`Supervisor`], [`SupervisorBuilder`]        |
//! | **Configuration** | Command, port, restart bound, intervals, output patterns.    | [`SupervisorConfig`], [`ClassifierConfig`]   |
//! | **Policies**      | Restart bound and delay before each restart.                 | [`RestartPolicy`], [`BackoffPolicy`]         |
//! | **Capabilities**  | Replaceable process, probe, reaper and timer layers.         | [`Spawner`], [`HealthProbe`], [`PortReaper`], [`Scheduler`] |
//! | **Events**        | Typed lifecycle events on a broadcast bus.                   | [`Event`], [`EventKind`], [`Subscribe`]      |
//! | **Errors**        | Typed errors with stable labels.                             | [`StartError`], [`RuntimeError`], [`ConfigError`] |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use procvisor::{CommandSpec, LogWriter, Subscribe, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = SupervisorConfig::new(CommandSpec::new("node").arg("quality-backend.js"), 3001);
//!     cfg.max_restarts = 10;
//!     cfg.health_check_interval = Duration::from_secs(10);
//!     cfg.startup_timeout = Duration::from_secs(30);
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let sup = Supervisor::builder(cfg).with_subscribers(subs).build()?;
//!
//!     sup.start().await?;
//!     if let Err(e) = sup.run_until_signal().await {
//!         eprintln!("{e}");
//!         std::process::exit(1);
//!     }
//!     Ok(())
//! }
//! ```
mod classifier;
mod config;
mod core;
mod error;
mod events;
mod health;
mod policies;
pub mod process;
pub mod scheduler;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{Phase, StatusSnapshot, Supervisor, SupervisorBuilder};
pub use classifier::{ClassifierConfig, OutputClassifier, Recurring, StderrVerdict, StdoutVerdict};
pub use config::SupervisorConfig;
pub use error::{ConfigError, ReapError, RuntimeError, SpawnError, StartError};
pub use events::{Bus, Event, EventKind};
pub use health::{HealthProbe, HttpProbe, ProbeOutcome};
pub use policies::{
    BackoffPolicy, HealthTransition, JitterPolicy, RestartDecision, RestartPolicy, RestartTracker,
};
pub use process::{
    CommandSpec, ExitInfo, LsofReaper, NoopReaper, OsSpawner, OutputSink, PortReaper,
    ProcessHandle, Spawner,
};
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
