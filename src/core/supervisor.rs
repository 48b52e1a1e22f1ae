//! # Supervisor: public handle to one watchdog instance.
//!
//! The [`Supervisor`] is a cheap, cloneable handle. All state lives in the
//! control loop (see `core::actor`); the handle only sends commands and
//! exposes the event bus.
//!
//! ## High-level architecture
//! ```text
//! Supervisor::builder(cfg).build()
//!     ├─► spawn ControlLoop::run(rx)           (owns the child and all timers)
//!     └─► spawn subscriber_listener():  Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!
//! Commands:
//!   start()  ── Signal::Start{reply}  ──► resolves on startup marker / failure
//!   stop()   ── Signal::Stop{reply}   ──► resolves after cleanup
//!   status() ── Signal::Status{reply} ──► StatusSnapshot
//!
//! Terminal path:
//!   ControlLoop (budget spent | unrecoverable stderr) ─► fatal watch = Some(Halt)
//!        └─► wait_fatal() / run_until_signal() ─► RuntimeError::{MaxRestartsReached, Unrecoverable}
//!
//! Shutdown path:
//!   shutdown::wait_for_shutdown_signal()
//!        └─► Bus.publish(ShutdownRequested) ─► stop()
//! ```
//!
//! Dropping the last handle cancels the control loop, which terminates the
//! child before exiting.
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{CommandSpec, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SupervisorConfig::new(CommandSpec::new("node").arg("server.js"), 3001);
//!     let sup = Supervisor::builder(cfg).build()?;
//!
//!     sup.start().await?;
//!     sup.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::DropGuard;
use tracing::info;

use crate::core::{
    builder::SupervisorBuilder,
    shutdown,
    signal::Signal,
    status::{Halt, StatusSnapshot},
};
use crate::{
    config::SupervisorConfig,
    error::{ConfigError, RuntimeError, StartError},
    events::{Bus, Event, EventKind},
};

struct Inner {
    tx: mpsc::UnboundedSender<Signal>,
    bus: Bus,
    fatal: watch::Receiver<Option<Halt>>,
    max_restarts: u32,
    _shutdown: DropGuard,
}

/// Handle to a running supervisor.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Returns a builder to customize capabilities and subscribers.
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    /// Builds a supervisor with the default OS capabilities and no subscribers.
    pub fn new(cfg: SupervisorConfig) -> Result<Self, ConfigError> {
        SupervisorBuilder::new(cfg).build()
    }

    pub(crate) fn new_internal(
        tx: mpsc::UnboundedSender<Signal>,
        bus: Bus,
        fatal: watch::Receiver<Option<Halt>>,
        max_restarts: u32,
        shutdown: DropGuard,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tx,
                bus,
                fatal,
                max_restarts,
                _shutdown: shutdown,
            }),
        }
    }

    /// (Re)starts the service.
    ///
    /// Any previous child is cleaned up and all counters are reset. Resolves
    /// once the startup marker is seen, or fails with a [`StartError`]. A failed
    /// start does not consume a restart slot. A newer call supersedes a pending one.
    pub async fn start(&self) -> Result<(), StartError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .tx
            .send(Signal::Start { reply })
            .map_err(|_| StartError::Closed)?;
        rx.await.map_err(|_| StartError::Closed)?
    }

    /// Stops monitoring and terminates the child. Idempotent.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.inner.tx.send(Signal::Stop { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns a point-in-time view of the runtime state.
    pub async fn status(&self) -> Result<StatusSnapshot, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .tx
            .send(Signal::Status { reply })
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Subscribes to lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// Resolves once the supervisor stops recovering.
    ///
    /// Returns [`RuntimeError::MaxRestartsReached`] when the restart budget is
    /// exhausted, [`RuntimeError::Unrecoverable`] when the child reported an
    /// error that needs a manual fix, or [`RuntimeError::Closed`] if the
    /// control loop ended first.
    pub async fn wait_fatal(&self) -> RuntimeError {
        let mut rx = self.inner.fatal.clone();
        let err = match rx.wait_for(Option::is_some).await {
            Ok(halt) => match &*halt {
                Some(Halt::Exhausted { reason }) => RuntimeError::MaxRestartsReached {
                    max: self.inner.max_restarts,
                    reason: reason.clone(),
                },
                Some(Halt::Unrecoverable { reason }) => RuntimeError::Unrecoverable {
                    reason: reason.clone(),
                },
                None => RuntimeError::Closed,
            },
            Err(_) => RuntimeError::Closed,
        };
        err
    }

    /// Supervises until a termination signal or the terminal state.
    ///
    /// On a signal the child is stopped and `Ok(())` is returned. When the
    /// supervisor gives up the error from [`wait_fatal`](Self::wait_fatal)
    /// is returned; hosts usually exit with status 1 then.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        tokio::select! {
            signal = shutdown::wait_for_shutdown_signal() => {
                let signal = signal?;
                info!(signal, "shutdown requested");
                self.inner.bus.publish(
                    Event::new(EventKind::ShutdownRequested).with_reason(signal),
                );
                self.stop().await;
                Ok(())
            }
            err = self.wait_fatal() => Err(err),
        }
    }
}
