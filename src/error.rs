//! Error types used by the procvisor runtime.
//!
//! This module defines the error enums surfaced by the public API:
//!
//! - [`StartError`]: a `start()` call did not bring the service up.
//! - [`RuntimeError`]: the supervisor itself stopped recovering.
//! - [`ConfigError`]: the configuration was rejected before anything ran.
//! - [`SpawnError`]: the process layer could not create the child.
//! - [`ReapError`]: the port reaper could not inspect or signal processes.
//!
//! The first three provide `as_label` for logs/metrics, following one convention:
//! short, stable, snake_case.

use std::time::Duration;
use thiserror::Error;

/// # Errors returned by [`Supervisor::start`](crate::Supervisor::start).
///
/// None of these consume a restart slot: a failed first start is reported to
/// the caller and the supervisor returns to idle.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// The startup marker did not appear within the configured timeout.
    #[error("startup timed out after {timeout:?}")]
    Timeout {
        /// The configured startup timeout.
        timeout: Duration,
    },

    /// The process exited before it reported readiness.
    #[error("process exited during startup (code={code:?}, signal={signal:?})")]
    EarlyExit {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Terminating signal, if any.
        signal: Option<i32>,
    },

    /// The process reported that its port is already bound.
    #[error("port {port} already in use")]
    PortInUse {
        /// The configured service port.
        port: u16,
    },

    /// The process reported a crash marker (e.g. out of memory) before readiness.
    #[error("process crashed during startup: {reason}")]
    Crashed {
        /// The stderr line carrying the marker.
        reason: String,
    },

    /// The process reported an error that a restart cannot fix.
    #[error("unrecoverable error during startup: {reason}")]
    Unrecoverable {
        /// The stderr line carrying the marker.
        reason: String,
    },

    /// The process could not be spawned at all.
    #[error("spawn failed: {reason}")]
    Spawn {
        /// The underlying error message.
        reason: String,
    },

    /// A newer `start()` call replaced this one before it resolved.
    #[error("superseded by a newer start request")]
    Superseded,

    /// `stop()` was called while startup was still pending.
    #[error("supervisor stopped during startup")]
    Stopped,

    /// The supervisor has reached its terminal state and refuses to start.
    #[error("supervisor is in the fatal state")]
    Fatal,

    /// The control loop is gone (supervisor dropped or panicked).
    #[error("supervisor control loop closed")]
    Closed,
}

impl StartError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::StartError;
    ///
    /// let err = StartError::PortInUse { port: 3001 };
    /// assert_eq!(err.as_label(), "start_port_in_use");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StartError::Timeout { .. } => "start_timeout",
            StartError::EarlyExit { .. } => "start_early_exit",
            StartError::PortInUse { .. } => "start_port_in_use",
            StartError::Crashed { .. } => "start_crashed",
            StartError::Unrecoverable { .. } => "start_unrecoverable",
            StartError::Spawn { .. } => "start_spawn_failed",
            StartError::Superseded => "start_superseded",
            StartError::Stopped => "start_stopped",
            StartError::Fatal => "start_fatal",
            StartError::Closed => "start_closed",
        }
    }

    /// Returns `true` for failures classified as a startup timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StartError::Timeout { .. })
    }
}

/// # Errors produced by the supervisor runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Restart budget exhausted; manual intervention is required.
    #[error("max restarts ({max}) reached; last crash: {reason}")]
    MaxRestartsReached {
        /// The configured restart bound.
        max: u32,
        /// Reason of the crash that could not be recovered.
        reason: String,
    },

    /// The child reported an error that needs a manual fix; nothing is restarted.
    #[error("unrecoverable error, manual fix required: {reason}")]
    Unrecoverable {
        /// The stderr line carrying the marker.
        reason: String,
    },

    /// Registering OS signal handlers failed.
    #[error("signal registration failed: {0}")]
    Signal(#[from] std::io::Error),

    /// The control loop is gone.
    #[error("supervisor control loop closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    ///
    /// let err = RuntimeError::MaxRestartsReached { max: 2, reason: "exit code 1".into() };
    /// assert_eq!(err.as_label(), "runtime_max_restarts");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::MaxRestartsReached { .. } => "runtime_max_restarts",
            RuntimeError::Unrecoverable { .. } => "runtime_unrecoverable",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Closed => "runtime_closed",
        }
    }
}

/// # Configuration rejected by [`SupervisorConfig::validate`](crate::SupervisorConfig::validate).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The command has no program to execute.
    #[error("command program is empty")]
    EmptyProgram,

    /// A period that drives a timer is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The health path must be absolute (start with `/`).
    #[error("health path {path:?} must start with '/'")]
    InvalidHealthPath {
        /// The configured path.
        path: String,
    },

    /// The recurring error threshold must be at least one.
    #[error("recurring error threshold must be at least 1")]
    ZeroThreshold,

    /// The default HTTP health probe could not build its client.
    #[error("health probe client setup failed: {reason}")]
    HttpClient {
        /// The underlying client error.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::EmptyProgram => "config_empty_program",
            ConfigError::ZeroDuration { .. } => "config_zero_duration",
            ConfigError::InvalidHealthPath { .. } => "config_invalid_health_path",
            ConfigError::ZeroThreshold => "config_zero_threshold",
            ConfigError::HttpClient { .. } => "config_http_client",
        }
    }
}

/// Failure to create a child process.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to start the program.
    #[error("failed to spawn {program:?}: {source}")]
    Io {
        /// Program that was being started.
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A spawner implementation rejected the request.
    #[error("{0}")]
    Rejected(String),
}

/// Failure of the best-effort port reaper.
#[derive(Error, Debug)]
pub enum ReapError {
    /// The process lookup tool could not be run.
    #[error("port lookup failed: {0}")]
    Lookup(#[source] std::io::Error),

    /// The lookup tool produced something unexpected.
    #[error("unparsable lookup output: {0:?}")]
    Parse(String),

    /// Signalling a pid failed.
    #[error("failed to signal pid {pid}: {reason}")]
    Signal {
        /// Target pid.
        pid: u32,
        /// OS error description.
        reason: String,
    },
}
