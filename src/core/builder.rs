use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::actor::{Capabilities, ControlLoop};
use super::supervisor::Supervisor;
use crate::{
    config::SupervisorConfig,
    error::ConfigError,
    events::Bus,
    health::{HealthProbe, HttpProbe},
    process::{LsofReaper, OsSpawner, PortReaper, Spawner},
    scheduler::{Scheduler, TokioScheduler},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for a [`Supervisor`] with replaceable capabilities.
///
/// Unset capabilities default to the real implementations: [`OsSpawner`],
/// [`HttpProbe`] on `cfg.health_url()`, [`LsofReaper`] and [`TokioScheduler`].
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    spawner: Option<Arc<dyn Spawner>>,
    probe: Option<Arc<dyn HealthProbe>>,
    reaper: Option<Arc<dyn PortReaper>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            spawner: None,
            probe: None,
            reaper: None,
            scheduler: None,
            subscribers: Vec::new(),
        }
    }

    /// Replaces the process spawner.
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Replaces the health probe.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replaces the port reaper.
    pub fn with_reaper(mut self, reaper: Arc<dyn PortReaper>) -> Self {
        self.reaper = Some(reaper);
        self
    }

    /// Replaces the timer scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive lifecycle events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and starts the control loop.
    ///
    /// Fails on an invalid configuration or when the default HTTP probe
    /// cannot build its client.
    ///
    /// Must be called inside a Tokio runtime. The child is not spawned until
    /// [`Supervisor::start`] is called.
    pub fn build(self) -> Result<Supervisor, ConfigError> {
        self.cfg.validate()?;

        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new(
                self.cfg.port,
                &self.cfg.health_path,
                self.cfg.health_timeout,
            )?) as Arc<dyn HealthProbe>,
        };
        let caps = Capabilities {
            spawner: self
                .spawner
                .unwrap_or_else(|| Arc::new(OsSpawner) as Arc<dyn Spawner>),
            probe,
            reaper: self
                .reaper
                .unwrap_or_else(|| Arc::new(LsofReaper) as Arc<dyn PortReaper>),
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(TokioScheduler) as Arc<dyn Scheduler>),
        };

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (fatal_tx, fatal_rx) = watch::channel(None);

        subscriber_listener(self.subscribers, &bus, token.clone());

        let max_restarts = self.cfg.max_restarts;
        let actor = ControlLoop::new(self.cfg, caps, bus.clone(), tx.clone(), fatal_tx);
        tokio::spawn(actor.run(rx, token.clone()));

        Ok(Supervisor::new_internal(
            tx,
            bus,
            fatal_rx,
            max_restarts,
            token.drop_guard(),
        ))
    }
}

/// Forwards bus events to the subscriber set until the supervisor is dropped.
fn subscriber_listener(subs: Vec<Arc<dyn Subscribe>>, bus: &Bus, token: CancellationToken) {
    if subs.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subs, bus.clone());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = token.cancelled() => break,
            }
        }
        set.shutdown().await;
    });
}
