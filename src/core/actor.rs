//! # ControlLoop: the single owner of runtime state.
//!
//! Every reaction of the supervisor happens here, one [`Signal`] at a time.
//! Nothing else mutates the process handle, the counters or the timers, so no
//! locks are needed.
//!
//! ## Architecture
//! ```text
//! Supervisor ──Start/Stop/Status──┐
//! OutputSink ──Stdout/Stderr/Exited┤
//! Scheduler  ──Deadline/Tick/Due──┼──► mpsc ──► ControlLoop::handle()
//! probe task ──HealthResult───────┘                 │
//!                                                   ├─► Spawner::spawn()
//!                                                   ├─► ProcessHandle::terminate()/kill()
//!                                                   ├─► reap_port()
//!                                                   └─► Bus::publish(Event)
//! ```
//!
//! ## Lifecycle
//! ```text
//! start()
//!   ├─► cleanup(), reset counters
//!   └─► spawn_child(First) ── marker ──► StartupSucceeded, healthy, reply Ok, start_monitoring()
//!                          ── timeout / early exit / port in use / crash marker ──► StartupFailed,
//!                                                                    cleanup(), reply Err, Idle
//!
//! crash (exit != 0 | recurring errors | failed probe | crash marker on stderr)
//!   └─► handle_crash(reason)
//!         ├─ budget spent ─► MaxRestartsReached, cleanup(), Fatal
//!         └─ otherwise    ─► RestartScheduled, cleanup(), Restarting
//!                              └─► RestartDue ─► spawn_child(Restart)
//!                                    ├─ marker ─► ServerRestarted, start_monitoring()
//!                                    └─ fails  ─► RestartFailed, Crashed, start_monitoring()
//!
//! unrecoverable marker on stderr (any phase)
//!   └─► FatalError, cleanup(), Fatal
//! ```
//!
//! ## Rules
//! - Every input carries a generation; `cleanup()` and every spawn bump it, so
//!   output, exits, deadlines and probe results of a replaced child are dropped.
//! - `cleanup()` finishes terminating the old child before the next spawn.
//! - At most one probe is in flight; ticks arriving meanwhile are skipped.
//! - Startup success marks the process healthy; only a failed probe clears
//!   that, so the restart counter is reset by recovery, not by every restart.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::{OutputClassifier, Recurring};
use crate::config::SupervisorConfig;
use crate::core::signal::Signal;
use crate::core::status::{Halt, Phase, StatusSnapshot};
use crate::error::StartError;
use crate::events::{Bus, Event, EventKind};
use crate::health::{HealthProbe, ProbeOutcome};
use crate::policies::{HealthTransition, RestartDecision, RestartTracker};
use crate::process::reaper::reap_port;
use crate::process::{CommandSpec, ExitInfo, OutputSink, PortReaper, ProcessHandle, Spawner};
use crate::scheduler::{Scheduler, TimerHandle};

const REASON_RECURRING: &str = "multiple recurring errors";
const REASON_HEALTH: &str = "health check failure";

/// Which kind of spawn is waiting for its startup marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    /// Spawn issued by `start()`; failures go back to the caller.
    First,
    /// Spawn issued by crash recovery.
    Restart,
}

/// Side-effecting capabilities injected by the builder.
pub(crate) struct Capabilities {
    pub spawner: Arc<dyn Spawner>,
    pub probe: Arc<dyn HealthProbe>,
    pub reaper: Arc<dyn PortReaper>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Mutable state, touched only by the control loop.
struct RuntimeState {
    process: Option<Box<dyn ProcessHandle>>,
    tracker: RestartTracker,
    classifier: OutputClassifier,
    generation: u64,
    phase: Phase,
    attempt: Option<Attempt>,
    pending_start: Option<oneshot::Sender<Result<(), StartError>>>,
    startup_timer: Option<TimerHandle>,
    health_timer: Option<TimerHandle>,
    restart_timer: Option<TimerHandle>,
    probe: Option<CancellationToken>,
    last_healthy_at: Option<SystemTime>,
}

pub(crate) struct ControlLoop {
    cfg: SupervisorConfig,
    command: CommandSpec,
    caps: Capabilities,
    bus: Bus,
    tx: mpsc::UnboundedSender<Signal>,
    fatal: watch::Sender<Option<Halt>>,
    state: RuntimeState,
}

impl ControlLoop {
    pub(crate) fn new(
        cfg: SupervisorConfig,
        caps: Capabilities,
        bus: Bus,
        tx: mpsc::UnboundedSender<Signal>,
        fatal: watch::Sender<Option<Halt>>,
    ) -> Self {
        let state = RuntimeState {
            process: None,
            tracker: RestartTracker::new(cfg.restart_policy()),
            classifier: OutputClassifier::new(cfg.classifier.clone(), cfg.port),
            generation: 0,
            phase: Phase::Idle,
            attempt: None,
            pending_start: None,
            startup_timer: None,
            health_timer: None,
            restart_timer: None,
            probe: None,
            last_healthy_at: None,
        };
        Self {
            command: cfg.effective_command(),
            cfg,
            caps,
            bus,
            tx,
            fatal,
            state,
        }
    }

    /// Processes signals until `token` is cancelled, then tears the child down.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Signal>,
        token: CancellationToken,
    ) {
        loop {
            let signal = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };
            self.handle(signal).await;
        }

        self.resolve_start(Err(StartError::Closed));
        self.cleanup().await;
        debug!(port = self.cfg.port, "control loop finished");
    }

    async fn handle(&mut self, signal: Signal) {
        match signal {
            Signal::Start { reply } => self.on_start(reply).await,
            Signal::Stop { reply } => {
                self.on_stop().await;
                let _ = reply.send(());
            }
            Signal::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Signal::Stdout { generation, line } if self.is_current(generation) => {
                self.on_stdout(line).await;
            }
            Signal::Stderr { generation, line } if self.is_current(generation) => {
                self.on_stderr(line).await;
            }
            Signal::Exited { generation, info } if self.is_current(generation) => {
                self.on_exit(info).await;
            }
            Signal::StartupDeadline { generation } if self.is_current(generation) => {
                let timeout = self.cfg.startup_timeout;
                self.startup_failed(StartError::Timeout { timeout }).await;
            }
            Signal::HealthTick { generation } if self.is_current(generation) => {
                self.on_health_tick();
            }
            Signal::HealthResult {
                generation,
                outcome,
            } if self.is_current(generation) => {
                self.on_health_result(outcome).await;
            }
            Signal::RestartDue { generation } if self.is_current(generation) => {
                self.on_restart_due().await;
            }
            stale => {
                debug!(current = self.state.generation, signal = ?stale, "dropping stale input");
            }
        }
    }

    // === Commands ===

    async fn on_start(&mut self, reply: oneshot::Sender<Result<(), StartError>>) {
        if self.state.phase == Phase::Fatal {
            let _ = reply.send(Err(StartError::Fatal));
            return;
        }
        if let Some(previous) = self.state.pending_start.take() {
            let _ = previous.send(Err(StartError::Superseded));
        }

        self.cleanup().await;
        self.state.classifier.reset();
        self.state.tracker.reset();
        self.state.last_healthy_at = None;
        self.state.pending_start = Some(reply);

        info!(command = %self.command.display(), port = self.cfg.port, "starting service");
        self.spawn_child(Attempt::First).await;
    }

    async fn on_stop(&mut self) {
        self.resolve_start(Err(StartError::Stopped));
        self.cleanup().await;
        if self.state.phase != Phase::Fatal {
            self.state.phase = Phase::Stopped;
        }
        self.publish(Event::new(EventKind::Stopped));
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.state.phase,
            pid: self.pid(),
            restart_count: self.state.tracker.count(),
            recurring_error_count: self.state.classifier.recurring_count(),
            is_healthy: self.state.tracker.is_healthy(),
            last_healthy_at: self.state.last_healthy_at,
        }
    }

    // === Spawn & startup ===

    async fn spawn_child(&mut self, attempt: Attempt) {
        self.state.generation += 1;
        let generation = self.state.generation;
        self.state.phase = Phase::Starting;
        self.state.attempt = Some(attempt);

        let sink = OutputSink::new(generation, self.tx.clone());
        let spawned = self.caps.spawner.spawn(&self.command, sink).await;
        match spawned {
            Ok(process) => {
                let pid = process.pid();
                self.state.process = Some(process);
                self.publish(
                    Event::new(EventKind::ProcessSpawned)
                        .with_pid(pid)
                        .with_generation(generation),
                );
                let deadline = self.post_after(
                    self.cfg.startup_timeout,
                    Signal::StartupDeadline { generation },
                );
                self.state.startup_timer = Some(deadline);
            }
            Err(e) => {
                self.startup_failed(StartError::Spawn {
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    fn startup_succeeded(&mut self) {
        let Some(attempt) = self.state.attempt.take() else {
            return;
        };
        self.state.startup_timer = None;
        self.state.phase = Phase::Healthy;
        self.state.tracker.mark_healthy();

        let pid = self.pid();
        let generation = self.state.generation;
        self.publish(
            Event::new(EventKind::StartupSucceeded)
                .with_pid(pid)
                .with_generation(generation),
        );
        match attempt {
            Attempt::First => self.resolve_start(Ok(())),
            Attempt::Restart => {
                let restart_count = self.state.tracker.count();
                info!(restart_count, ?pid, "service restarted");
                self.publish(
                    Event::new(EventKind::ServerRestarted)
                        .with_restart_count(restart_count)
                        .with_pid(pid)
                        .with_generation(generation),
                );
            }
        }
        self.start_monitoring();
    }

    async fn startup_failed(&mut self, err: StartError) {
        let Some(attempt) = self.state.attempt.take() else {
            return;
        };
        self.state.startup_timer = None;

        let reason = err.to_string();
        warn!(error = %err, label = err.as_label(), "startup failed");
        self.publish(
            Event::new(EventKind::StartupFailed)
                .with_reason(reason.as_str())
                .with_generation(self.state.generation),
        );

        match attempt {
            Attempt::First => {
                self.cleanup().await;
                self.state.phase = Phase::Idle;
                self.resolve_start(Err(err));
            }
            Attempt::Restart => {
                // Recovery continues through the health poller.
                self.publish(
                    Event::new(EventKind::RestartFailed)
                        .with_restart_count(self.state.tracker.count())
                        .with_reason(reason.as_str()),
                );
                self.state.phase = Phase::Crashed;
                self.start_monitoring();
            }
        }
    }

    fn resolve_start(&mut self, result: Result<(), StartError>) {
        if let Some(reply) = self.state.pending_start.take() {
            let _ = reply.send(result);
        }
    }

    // === Child output & exit ===

    async fn on_stdout(&mut self, line: String) {
        let verdict = self.state.classifier.classify_stdout(&line);
        if verdict.relay {
            info!(target: "procvisor::child", "{line}");
        }

        if let Recurring::Counted(n) | Recurring::Tripped(n) = verdict.recurring {
            self.publish(
                Event::new(EventKind::RecurringError)
                    .with_attempt(n)
                    .with_reason(line.as_str()),
            );
        }
        if verdict.ready && self.state.attempt.is_some() {
            self.startup_succeeded();
        }
        if let Recurring::Tripped(n) = verdict.recurring {
            if self.state.attempt.is_some() {
                warn!(count = n, "recurring errors during startup");
            } else if self.is_monitoring() {
                self.handle_crash(REASON_RECURRING.to_string()).await;
            }
        }
    }

    async fn on_stderr(&mut self, line: String) {
        let verdict = self.state.classifier.classify_stderr(&line);
        if verdict.relay {
            warn!(target: "procvisor::child", "{line}");
        }

        if verdict.port_in_use {
            if self.state.attempt.is_some() {
                let port = self.cfg.port;
                self.startup_failed(StartError::PortInUse { port }).await;
            } else {
                warn!(port = self.cfg.port, "child reports its port already in use");
            }
        } else if verdict.unrecoverable {
            self.halt_unrecoverable(line).await;
        } else if verdict.crash {
            if self.state.attempt.is_some() {
                self.startup_failed(StartError::Crashed { reason: line }).await;
            } else if self.is_monitoring() {
                self.handle_crash(line).await;
            }
        }
    }

    async fn on_exit(&mut self, info: ExitInfo) {
        if self.state.attempt.is_some() {
            self.startup_failed(StartError::EarlyExit {
                code: info.code,
                signal: info.signal,
            })
            .await;
            return;
        }

        self.publish(
            Event::new(EventKind::ProcessExited)
                .with_pid(self.pid())
                .with_exit(info.code, info.signal)
                .with_generation(self.state.generation),
        );
        if info.success() {
            info!("service exited cleanly, not restarting");
            self.cleanup().await;
            self.state.phase = Phase::Exited;
            return;
        }
        if self.is_monitoring() {
            self.handle_crash(info.describe()).await;
        }
    }

    // === Health ===

    fn start_monitoring(&mut self) {
        let generation = self.state.generation;
        let tx = self.tx.clone();
        let timer = self.caps.scheduler.every(
            self.cfg.health_grace,
            self.cfg.health_check_interval,
            Arc::new(move || {
                let _ = tx.send(Signal::HealthTick { generation });
            }),
        );
        self.state.health_timer = Some(timer);
    }

    fn on_health_tick(&mut self) {
        if self.state.health_timer.is_none() {
            return;
        }
        if self.state.probe.is_some() {
            debug!("probe still in flight, skipping tick");
            return;
        }

        let token = CancellationToken::new();
        self.state.probe = Some(token.clone());

        let probe = Arc::clone(&self.caps.probe);
        let tx = self.tx.clone();
        let generation = self.state.generation;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => ProbeOutcome::Cancelled,
                outcome = probe.check() => outcome,
            };
            let _ = tx.send(Signal::HealthResult {
                generation,
                outcome,
            });
        });
    }

    async fn on_health_result(&mut self, outcome: ProbeOutcome) {
        self.state.probe = None;
        if outcome == ProbeOutcome::Cancelled || self.state.health_timer.is_none() {
            return;
        }

        match self.state.tracker.on_health(outcome.is_healthy()) {
            HealthTransition::Restored { reset_from } => {
                self.state.last_healthy_at = Some(SystemTime::now());
                if self.state.phase == Phase::Crashed {
                    self.state.phase = Phase::Healthy;
                }
                info!(reset_from = ?reset_from, "health restored");
                self.publish(
                    Event::new(EventKind::HealthRestored)
                        .with_restart_count(reset_from.unwrap_or(0))
                        .with_generation(self.state.generation),
                );
            }
            HealthTransition::Unchanged => {
                self.state.last_healthy_at = Some(SystemTime::now());
            }
            HealthTransition::Unhealthy => {
                let reason = outcome.describe();
                warn!(reason = %reason, "health check failed");
                self.publish(
                    Event::new(EventKind::HealthCheckFailed)
                        .with_reason(reason.as_str())
                        .with_generation(self.state.generation),
                );
                if self.state.process.is_some() || self.state.phase == Phase::Crashed {
                    self.handle_crash(REASON_HEALTH.to_string()).await;
                }
            }
        }
    }

    // === Recovery ===

    async fn handle_crash(&mut self, reason: String) {
        let before = self.state.tracker.count();
        warn!(reason = %reason, restart_count = before, "crash detected");
        self.publish(
            Event::new(EventKind::CrashDetected)
                .with_reason(reason.as_str())
                .with_restart_count(before)
                .with_pid(self.pid())
                .with_generation(self.state.generation),
        );

        match self.state.tracker.on_crash() {
            RestartDecision::Exhausted { restarts } => {
                error!(
                    restarts,
                    max = self.cfg.max_restarts,
                    "max restarts reached, manual intervention required"
                );
                self.publish(
                    Event::new(EventKind::MaxRestartsReached)
                        .with_restart_count(restarts)
                        .with_reason(reason.as_str()),
                );
                self.cleanup().await;
                self.state.phase = Phase::Fatal;
                self.fatal.send_replace(Some(Halt::Exhausted { reason }));
            }
            RestartDecision::Restart { attempt, delay } => {
                self.publish(
                    Event::new(EventKind::RestartScheduled)
                        .with_restart_count(attempt)
                        .with_delay(delay)
                        .with_reason(reason.as_str()),
                );
                self.cleanup().await;
                self.state.phase = Phase::Restarting;

                let generation = self.state.generation;
                let due = self.post_after(delay, Signal::RestartDue { generation });
                self.state.restart_timer = Some(due);
            }
        }
    }

    /// Gives up without restarting: the child reported something only an
    /// operator can fix.
    async fn halt_unrecoverable(&mut self, reason: String) {
        error!(reason = %reason, "unrecoverable error reported, manual fix required");
        self.publish(
            Event::new(EventKind::FatalError)
                .with_reason(reason.as_str())
                .with_pid(self.pid())
                .with_generation(self.state.generation),
        );
        self.resolve_start(Err(StartError::Unrecoverable {
            reason: reason.clone(),
        }));
        self.cleanup().await;
        self.state.phase = Phase::Fatal;
        self.fatal.send_replace(Some(Halt::Unrecoverable { reason }));
    }

    async fn on_restart_due(&mut self) {
        if self.state.phase != Phase::Restarting {
            return;
        }
        self.state.restart_timer = None;
        info!(
            restart_count = self.state.tracker.count(),
            max = self.cfg.max_restarts,
            "restarting service"
        );
        self.spawn_child(Attempt::Restart).await;
    }

    // === Cleanup ===

    /// Cancels timers and the probe, terminates the child, then reaps the port.
    async fn cleanup(&mut self) {
        self.state.generation += 1;
        self.state.attempt = None;
        self.state.startup_timer = None;
        self.state.health_timer = None;
        self.state.restart_timer = None;
        if let Some(probe) = self.state.probe.take() {
            probe.cancel();
        }
        self.state.tracker.forget_health();

        if let Some(process) = self.state.process.take() {
            self.terminate(&*process).await;
        }
        let port = self.cfg.port;
        for pid in reap_port(self.caps.reaper.as_ref(), port).await {
            info!(pid, port, "killed stray process bound to port");
            self.publish(
                Event::new(EventKind::PortReaped)
                    .with_pid(Some(pid))
                    .with_port(port),
            );
        }
    }

    async fn terminate(&self, process: &dyn ProcessHandle) {
        if process.try_exit().is_some() {
            return;
        }
        let pid = process.pid();
        if let Err(e) = process.terminate() {
            debug!(?pid, error = %e, "graceful termination failed");
        }
        if process.wait_exit(self.cfg.terminate_grace).await.is_some() {
            return;
        }

        debug!(?pid, "still alive after grace, killing");
        if let Err(e) = process.kill() {
            warn!(?pid, error = %e, "forceful termination failed");
        }
        if self.cfg.kill_wait.is_zero() {
            return;
        }
        if process.wait_exit(self.cfg.kill_wait).await.is_none() {
            warn!(?pid, wait = ?self.cfg.kill_wait, "no exit confirmation after kill");
        }
    }

    // === Helpers ===

    #[inline]
    fn is_current(&self, generation: u64) -> bool {
        generation == self.state.generation
    }

    #[inline]
    fn is_monitoring(&self) -> bool {
        matches!(self.state.phase, Phase::Healthy | Phase::Crashed)
    }

    fn pid(&self) -> Option<u32> {
        self.state.process.as_ref().and_then(|p| p.pid())
    }

    fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    fn post_after(&self, delay: Duration, signal: Signal) -> TimerHandle {
        let tx = self.tx.clone();
        self.caps.scheduler.after(
            delay,
            Box::new(move || {
                let _ = tx.send(signal);
            }),
        )
    }
}
