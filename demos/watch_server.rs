//! # Example: watch_server
//!
//! Keeps a local HTTP service alive until Ctrl-C.
//!
//! ```text
//! main ──► Supervisor::builder(cfg).with_subscribers([LogWriter]).build()
//!      ──► start()            (waits for "Server running" / "ready")
//!      ──► run_until_signal()
//!             ├─ SIGINT/SIGTERM  ─► stop(), exit 0
//!             └─ budget spent    ─► exit 1
//! ```
//!
//! ## Run
//! ```bash
//! # default: node quality-backend.js on port 3001
//! cargo run --example watch_server
//!
//! # any other command; the service reads its port from $PORT
//! RUST_LOG=procvisor=debug cargo run --example watch_server -- python3 -m http.server
//! ```

use std::sync::Arc;
use std::time::Duration;

use procvisor::{CommandSpec, LogWriter, Subscribe, Supervisor, SupervisorConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = SupervisorConfig::default();
    let mut words = std::env::args().skip(1);
    if let Some(program) = words.next() {
        cfg.command = CommandSpec::new(program).args(words);
    }
    cfg.max_restarts = 10;
    cfg.health_check_interval = Duration::from_secs(10);
    cfg.startup_timeout = Duration::from_secs(30);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = Supervisor::builder(cfg).with_subscribers(subs).build()?;

    if let Err(e) = sup.start().await {
        tracing::error!(error = %e, label = e.as_label(), "service did not start");
        std::process::exit(1);
    }

    if let Err(e) = sup.run_until_signal().await {
        tracing::error!(error = %e, "giving up");
        std::process::exit(1);
    }
    Ok(())
}
