//! # Process layer: spawning, output, termination, port reaping.
//!
//! The control loop talks to child processes only through two capabilities:
//! - [`Spawner`] creates a process for a [`CommandSpec`] and wires its output
//!   and exit into an [`OutputSink`];
//! - [`ProcessHandle`] signals the running process and waits for its exit.
//!
//! ```text
//! Spawner::spawn(cmd, sink) ──► Box<dyn ProcessHandle>
//!        │
//!        ├─ stdout line ──► sink.stdout(line) ─┐
//!        ├─ stderr line ──► sink.stderr(line) ─┼─► control loop (tagged with generation)
//!        └─ exit        ──► sink.exited(info) ─┘
//! ```
//!
//! [`OsSpawner`] is the real implementation on `tokio::process`; tests plug in
//! scripted spawners. Stray processes still bound to the service port are
//! handled by the [`PortReaper`] capability (see [`reaper`]).

mod os;
pub mod reaper;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::Signal;
use crate::error::SpawnError;

pub use os::OsSpawner;
pub use reaper::{LsofReaper, NoopReaper, PortReaper};

/// What to run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable or script interpreter.
    pub program: String,
    /// Arguments passed to `program`.
    pub args: Vec<String>,
    /// Environment overrides on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory (`None` = the supervisor's own).
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a spec for `program` without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds or replaces an environment override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program and arguments joined by spaces, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a child process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Normal exit with `code`.
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Killed by `signal`.
    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns `true` for exit code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable crash reason ("exit code N" / "terminated by signal N").
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(sig)) => format!("terminated by signal {sig}"),
            (None, None) => "exited with unknown status".to_string(),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Where a spawned process reports its output and exit.
///
/// Every report carries the generation of the spawn it belongs to, so reports
/// from a replaced process are ignored by the control loop.
#[derive(Clone, Debug)]
pub struct OutputSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Signal>,
}

impl OutputSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink is bound to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports one stdout line. Returns `false` once the supervisor is gone.
    pub fn stdout(&self, line: impl Into<String>) -> bool {
        self.send(Signal::Stdout {
            generation: self.generation,
            line: line.into(),
        })
    }

    /// Reports one stderr line. Returns `false` once the supervisor is gone.
    pub fn stderr(&self, line: impl Into<String>) -> bool {
        self.send(Signal::Stderr {
            generation: self.generation,
            line: line.into(),
        })
    }

    /// Reports the process exit. Returns `false` once the supervisor is gone.
    pub fn exited(&self, info: ExitInfo) -> bool {
        self.send(Signal::Exited {
            generation: self.generation,
            info,
        })
    }

    fn send(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

/// One spawned OS process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Exit status if the process already exited.
    fn try_exit(&self) -> Option<ExitInfo>;

    /// Requests graceful termination (SIGTERM on Unix).
    fn terminate(&self) -> io::Result<()>;

    /// Forces termination (SIGKILL on Unix).
    fn kill(&self) -> io::Result<()>;

    /// Waits up to `within` for the process to exit.
    async fn wait_exit(&self, within: Duration) -> Option<ExitInfo>;
}

/// Creates child processes.
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    /// Spawns `cmd`, forwarding output and exit into `sink`.
    async fn spawn(
        &self,
        cmd: &CommandSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_replaces_existing_key() {
        let spec = CommandSpec::new("node")
            .arg("server.js")
            .env("PORT", "1")
            .env("PORT", "3001");
        assert_eq!(spec.env, vec![("PORT".to_string(), "3001".to_string())]);
        assert_eq!(spec.display(), "node server.js");
    }

    #[test]
    fn exit_info_describes_crash() {
        assert_eq!(ExitInfo::code(137).describe(), "exit code 137");
        assert_eq!(ExitInfo::signal(9).describe(), "terminated by signal 9");
        assert!(ExitInfo::code(0).success());
        assert!(!ExitInfo::signal(15).success());
    }

    #[tokio::test]
    async fn sink_tags_reports_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(7, tx);
        assert!(sink.stdout("hello"));
        match rx.recv().await {
            Some(Signal::Stdout { generation, line }) => {
                assert_eq!(generation, 7);
                assert_eq!(line, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        drop(rx);
        assert!(!sink.exited(ExitInfo::code(0)));
    }
}
