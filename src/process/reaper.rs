//! # Port reaper.
//!
//! Before a fresh spawn, anything still bound to the service port is killed.
//! This catches orphans left by earlier runs (e.g. after the supervisor itself
//! was hard-killed) which would otherwise make the new child fail with
//! "address already in use".
//!
//! ```text
//! reap_port(reaper, port)
//!   ├─► reaper.pids_on_port(port)    (lsof -t -iTCP:<port> -sTCP:LISTEN)
//!   ├─► skip our own pid
//!   └─► reaper.kill(pid)             (SIGKILL)
//! ```
//!
//! Every failure here is logged and swallowed: a free port is the normal case.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ReapError;

/// Lists and kills processes bound to a TCP port.
#[async_trait]
pub trait PortReaper: Send + Sync + 'static {
    /// Returns pids of processes listening on `port`.
    async fn pids_on_port(&self, port: u16) -> Result<Vec<u32>, ReapError>;

    /// Forcefully terminates `pid`.
    async fn kill(&self, pid: u32) -> Result<(), ReapError>;
}

/// Reaper using `lsof` for the lookup and `SIGKILL` for termination.
///
/// Only listening sockets are matched; clients connected to the port are left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LsofReaper;

#[async_trait]
impl PortReaper for LsofReaper {
    async fn pids_on_port(&self, port: u16) -> Result<Vec<u32>, ReapError> {
        let output = Command::new("lsof")
            .args(lsof_args(port))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ReapError::Lookup)?;

        // lsof exits with 1 when nothing matches.
        if !output.status.success() && output.stdout.is_empty() {
            return Ok(Vec::new());
        }
        parse_pids(&String::from_utf8_lossy(&output.stdout))
    }

    #[cfg(unix)]
    async fn kill(&self, pid: u32) -> Result<(), ReapError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ReapError::Signal {
            pid,
            reason: "pid out of range".into(),
        })?;
        kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|e| ReapError::Signal {
            pid,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    async fn kill(&self, pid: u32) -> Result<(), ReapError> {
        Err(ReapError::Signal {
            pid,
            reason: "unsupported platform".into(),
        })
    }
}

/// Reaper that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReaper;

#[async_trait]
impl PortReaper for NoopReaper {
    async fn pids_on_port(&self, _port: u16) -> Result<Vec<u32>, ReapError> {
        Ok(Vec::new())
    }

    async fn kill(&self, _pid: u32) -> Result<(), ReapError> {
        Ok(())
    }
}

/// Kills every process bound to `port` except the current one.
///
/// Returns the pids that were killed. Never fails.
pub async fn reap_port(reaper: &dyn PortReaper, port: u16) -> Vec<u32> {
    let own = std::process::id();
    let pids = match reaper.pids_on_port(port).await {
        Ok(pids) => pids,
        Err(e) => {
            debug!(port, error = %e, "port lookup skipped");
            return Vec::new();
        }
    };

    let mut reaped = Vec::with_capacity(pids.len());
    for pid in pids.into_iter().filter(|p| *p != own) {
        match reaper.kill(pid).await {
            Ok(()) => reaped.push(pid),
            Err(e) => debug!(port, pid, error = %e, "failed to reap"),
        }
    }
    reaped
}

fn lsof_args(port: u16) -> [String; 3] {
    [
        "-t".to_string(),
        format!("-iTCP:{port}"),
        "-sTCP:LISTEN".to_string(),
    ]
}

fn parse_pids(text: &str) -> Result<Vec<u32>, ReapError> {
    let mut pids = Vec::new();
    for token in text.split_whitespace() {
        let pid = token
            .parse::<u32>()
            .map_err(|_| ReapError::Parse(token.to_string()))?;
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    Ok(pids)
}
