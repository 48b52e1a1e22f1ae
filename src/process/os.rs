//! # OS-backed spawner on `tokio::process`.
//!
//! ```text
//! OsSpawner::spawn()
//!   ├─► Command (inherited env + overrides, piped stdout/stderr, kill_on_drop)
//!   ├─► reader task: stdout lines ──► sink.stdout()
//!   ├─► reader task: stderr lines ──► sink.stderr()
//!   └─► waiter task: owns Child
//!          ├─ kill request ──► child.start_kill()
//!          └─ child.wait() ──► drain readers (bounded) ──► watch ← Some(exit) ──► sink.exited()
//! ```
//!
//! Graceful termination sends SIGTERM by pid, but only while the waiter has not
//! observed the exit yet, so a recycled pid is never signalled.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, ExitInfo, OutputSink, ProcessHandle, Spawner};
use crate::error::SpawnError;

/// How long the waiter lets readers drain after the child exits.
const READER_DRAIN: Duration = Duration::from_secs(1);

/// [`Spawner`] that starts real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpawner;

#[async_trait]
impl Spawner for OsSpawner {
    async fn spawn(
        &self,
        cmd: &CommandSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Io {
            program: cmd.program.clone(),
            source,
        })?;
        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            let sink = sink.clone();
            readers.push(pump_lines(out, move |line| sink.stdout(line)));
        }
        if let Some(err) = child.stderr.take() {
            let sink = sink.clone();
            readers.push(pump_lines(err, move |line| sink.stderr(line)));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(()) = kill_rx.recv() => {
                        if let Err(e) = child.start_kill() {
                            debug!(?pid, error = %e, "kill request failed");
                        }
                    }
                }
            };
            let info = match status {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    warn!(?pid, error = %e, "waiting on child failed");
                    ExitInfo {
                        code: None,
                        signal: None,
                    }
                }
            };
            for reader in readers {
                let _ = tokio::time::timeout(READER_DRAIN, reader).await;
            }
            let _ = exit_tx.send(Some(info));
            sink.exited(info);
        });

        Ok(Box::new(OsProcess {
            pid,
            exit: exit_rx,
            kill: kill_tx,
        }))
    }
}

/// Forwards `stream` line by line until EOF, a read error, or a closed sink.
///
/// Lines are decoded lossily: invalid UTF-8 must not stop classification of
/// the lines that follow.
fn pump_lines<R, F>(stream: R, mut emit: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(String) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if !emit(decode_line(&buf)) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "reading child output failed");
                    break;
                }
            }
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Handle to a process started by [`OsSpawner`].
struct OsProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    #[cfg(unix)]
    fn terminate(&self) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if self.try_exit().is_some() {
            return Ok(());
        }
        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return self.kill();
        };
        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> io::Result<()> {
        self.kill()
    }

    fn kill(&self) -> io::Result<()> {
        if self.try_exit().is_some() {
            return Ok(());
        }
        self.kill
            .send(())
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "process waiter gone"))
    }

    async fn wait_exit(&self, within: Duration) -> Option<ExitInfo> {
        let mut rx = self.exit.clone();
        match tokio::time::timeout(within, rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            _ => self.try_exit(),
        }
    }
}
