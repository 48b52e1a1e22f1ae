//! # Supervisor configuration.
//!
//! [`SupervisorConfig`] is fixed for the life of one supervisor. The five core
//! parameters (`command`, `port`, `max_restarts`, `health_check_interval`,
//! `startup_timeout`) come first; the remaining fields tune timings and output
//! patterns and default to values that suit a typical Node/Python HTTP service.
//!
//! ## Sentinel values
//! - `max_restarts = 0` → the first crash is fatal.
//! - `kill_wait = 0s` → do not wait for exit confirmation after SIGKILL.

use std::time::Duration;

use crate::classifier::ClassifierConfig;
use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::process::CommandSpec;

/// Configuration of one supervisor instance.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use procvisor::{CommandSpec, SupervisorConfig};
///
/// let mut cfg = SupervisorConfig::new(CommandSpec::new("node").arg("server.js"), 3001);
/// cfg.max_restarts = 5;
/// cfg.health_check_interval = Duration::from_secs(10);
/// assert!(cfg.validate().is_ok());
/// assert_eq!(cfg.health_url(), "http://localhost:3001/api/health");
/// ```
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// What to run.
    pub command: CommandSpec,
    /// Port the service listens on; health checks and port reaping target it.
    pub port: u16,
    /// Restarts allowed before the supervisor gives up.
    pub max_restarts: u32,
    /// Period between health probes.
    pub health_check_interval: Duration,
    /// Maximum time between spawn and the startup marker.
    pub startup_timeout: Duration,

    /// Path of the health endpoint (must start with `/`).
    pub health_path: String,
    /// Upper bound for one health request.
    pub health_timeout: Duration,
    /// Delay before the first probe after startup.
    pub health_grace: Duration,
    /// Delay policy before each restart.
    pub restart_backoff: BackoffPolicy,
    /// Time between the graceful and the forceful termination signal.
    pub terminate_grace: Duration,
    /// Time to wait for exit confirmation after the forceful signal.
    pub kill_wait: Duration,
    /// Output patterns.
    pub classifier: ClassifierConfig,
    /// Export `PORT=<port>` into the child environment.
    pub export_port_env: bool,
    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Creates a configuration with default tuning for `command` on `port`.
    pub fn new(command: CommandSpec, port: u16) -> Self {
        Self {
            command,
            port,
            ..Self::default()
        }
    }

    /// Full health endpoint URL.
    pub fn health_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.health_path)
    }

    /// Restart rule derived from `max_restarts` and `restart_backoff`.
    #[inline]
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.max_restarts,
            backoff: self.restart_backoff,
        }
    }

    /// The command as it is actually spawned (with `PORT` exported if enabled).
    pub fn effective_command(&self) -> CommandSpec {
        let cmd = self.command.clone();
        if self.export_port_env {
            cmd.env("PORT", self.port.to_string())
        } else {
            cmd
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Rejects configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        let timers = [
            ("health_check_interval", self.health_check_interval),
            ("startup_timeout", self.startup_timeout),
            ("health_timeout", self.health_timeout),
        ];
        if let Some((field, _)) = timers.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration { field });
        }
        if !self.health_path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath {
                path: self.health_path.clone(),
            });
        }
        if self.classifier.recurring_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    /// Defaults:
    ///
    /// - `command = node quality-backend.js`, `port = 3001`
    /// - `max_restarts = 10`
    /// - `health_check_interval = 10s`, `startup_timeout = 30s`
    /// - `health_path = /api/health`, `health_timeout = 5s`, `health_grace = 5s`
    /// - `restart_backoff` = constant 3s
    /// - `terminate_grace = 1s`, `kill_wait = 5s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            command: CommandSpec::new("node").arg("quality-backend.js"),
            port: 3001,
            max_restarts: 10,
            health_check_interval: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(30),
            health_path: "/api/health".to_string(),
            health_timeout: Duration::from_secs(5),
            health_grace: Duration::from_secs(5),
            restart_backoff: BackoffPolicy::default(),
            terminate_grace: Duration::from_secs(1),
            kill_wait: Duration::from_secs(5),
            classifier: ClassifierConfig::default(),
            export_port_env: true,
            bus_capacity: 1024,
        }
    }
}
