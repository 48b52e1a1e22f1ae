//! # Example: custom_subscriber
//!
//! Demonstrates how to build and attach a custom event subscriber.
//!
//! Shows how to:
//! - Implement the [`Subscribe`] trait.
//! - Inspect [`Event`] / [`EventKind`] for restart and health metrics.
//! - Wire the subscriber into [`Supervisor::builder`].
//!
//! The supervised child is a small shell loop that prints the startup marker
//! and crashes after a few seconds, so restarts are visible quickly.
//!
//! ## Run
//! ```bash
//! cargo run --example custom_subscriber
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use procvisor::{
    BackoffPolicy, CommandSpec, Event, EventKind, JitterPolicy, Subscribe, Supervisor,
    SupervisorConfig,
};

/// Counts restarts and prints selected events.
/// In real life, you could export metrics, ship logs, or page someone.
#[derive(Default)]
struct RestartCounter {
    restarts: AtomicU32,
}

#[async_trait::async_trait]
impl Subscribe for RestartCounter {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::ProcessSpawned => {
                println!("[sub] spawned:   pid={:?}", ev.pid);
            }
            EventKind::CrashDetected => {
                println!(
                    "[sub] crash:     reason={}",
                    ev.reason.as_deref().unwrap_or("<none>")
                );
            }
            EventKind::RestartScheduled => {
                let delay = ev.delay_ms.map(|v| format!("{v}ms")).unwrap_or_default();
                println!(
                    "[sub] restart:   #{} in {delay}",
                    ev.restart_count.unwrap_or(0)
                );
            }
            EventKind::ServerRestarted => {
                let total = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                println!("[sub] restarted: total={total}");
            }
            EventKind::MaxRestartsReached => {
                println!("[sub] FATAL:     giving up after {:?}", ev.restart_count);
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                println!("[sub] {:?}: {:?}", ev.kind, ev.reason);
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "restart-counter"
    }

    fn queue_capacity(&self) -> usize {
        256
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let script = "echo 'Server running'; sleep 2; echo 'fatal: out of memory' >&2; exit 1";
    let mut cfg = SupervisorConfig::new(CommandSpec::new("sh").args(["-c", script]), 4517);
    cfg.max_restarts = 3;
    cfg.health_grace = Duration::from_secs(60);
    cfg.restart_backoff = BackoffPolicy {
        first: Duration::from_millis(500),
        max: Duration::from_secs(5),
        factor: 2.0,
        jitter: JitterPolicy::Equal,
    };

    let counter = Arc::new(RestartCounter::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![counter.clone()];
    let sup = Supervisor::builder(cfg).with_subscribers(subs).build()?;

    sup.start().await?;
    let err = sup.wait_fatal().await;
    println!(
        "supervisor stopped: {err} (restarts seen: {})",
        counter.restarts.load(Ordering::Relaxed)
    );

    // let the subscriber drain before exiting
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
