//! # Output classifier for the supervised process.
//!
//! [`OutputClassifier`] looks at one line of child output at a time and answers
//! three questions for the control loop:
//! - did the process just report that it is ready (startup marker)?
//! - does the line carry the recurring error signature, and has the counter
//!   reached its threshold?
//! - should the line be relayed to the operator, or is it noise?
//!
//! ```text
//! stdout line ──► classify_stdout()
//!                   ├─ ready:     marker match (or "port" + port number)
//!                   ├─ recurring: "error" + keyword → count += 1 (Tripped at threshold)
//!                   │             no "error"        → count := 0
//!                   └─ relay:     !noise
//!
//! stderr line ──► classify_stderr()
//!                   ├─ port_in_use:   any port-in-use marker
//!                   ├─ unrecoverable: e.g. "cannot find module" (never restarted)
//!                   ├─ crash:         e.g. "out of memory" (restart right away)
//!                   └─ relay:         !noise
//! ```
//!
//! All stderr markers match case-insensitively; startup markers match as written.
//!
//! The counter is reset by clean output, never by time.

/// Patterns used by [`OutputClassifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Substrings that signal readiness on stdout.
    pub startup_markers: Vec<String>,
    /// Also treat a line mentioning `port` together with the service port as ready.
    pub port_mention_is_ready: bool,
    /// Keyword that, together with `error`, forms the recurring signature (case-insensitive).
    pub error_keyword: String,
    /// Number of consecutive signature lines that trigger crash handling.
    pub recurring_threshold: u32,
    /// Substrings that make a line noise (not relayed).
    pub noise: Vec<String>,
    /// Substrings on stderr meaning the port is already bound (case-insensitive).
    pub port_in_use_markers: Vec<String>,
    /// Substrings on stderr that need a manual fix; the supervisor gives up (case-insensitive).
    pub unrecoverable_markers: Vec<String>,
    /// Substrings on stderr that count as a crash without waiting for an exit (case-insensitive).
    pub crash_markers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            startup_markers: vec![
                "Server running".into(),
                "listening".into(),
                "ready".into(),
            ],
            port_mention_is_ready: true,
            error_keyword: "consul".into(),
            recurring_threshold: 3,
            noise: vec!["[ioredis]".into(), "dotenv".into()],
            port_in_use_markers: vec!["EADDRINUSE".into(), "address already in use".into()],
            unrecoverable_markers: vec!["cannot find module".into()],
            crash_markers: vec!["out of memory".into()],
        }
    }
}

/// Effect of one stdout line on the recurring error counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recurring {
    /// Line carries no `error`; the counter was reset (or already zero).
    Clean,
    /// Line mentions `error` without the keyword; counter untouched.
    Untouched,
    /// Signature seen; counter is now `n`, below the threshold.
    Counted(u32),
    /// Signature seen and the threshold was reached; the counter restarts at zero.
    Tripped(u32),
}

/// Verdict for one stdout line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StdoutVerdict {
    /// Line matches a startup marker.
    pub ready: bool,
    /// Effect on the recurring error counter.
    pub recurring: Recurring,
    /// Line should be relayed to the operator.
    pub relay: bool,
}

/// Verdict for one stderr line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StderrVerdict {
    /// Line reports that the port is already bound.
    pub port_in_use: bool,
    /// Line reports an error a restart cannot fix.
    pub unrecoverable: bool,
    /// Line reports a crash of a still running process.
    pub crash: bool,
    /// Line should be relayed to the operator.
    pub relay: bool,
}

/// Stateful line classifier. One per supervisor; [`reset`](Self::reset) at every start.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    cfg: ClassifierConfig,
    port: String,
    keyword: String,
    port_in_use: Vec<String>,
    unrecoverable: Vec<String>,
    crash: Vec<String>,
    recurring: u32,
}

impl OutputClassifier {
    /// Creates a classifier for a service listening on `port`.
    pub fn new(cfg: ClassifierConfig, port: u16) -> Self {
        let lowered = |markers: &[String]| -> Vec<String> {
            markers.iter().map(|m| m.to_lowercase()).collect()
        };
        Self {
            keyword: cfg.error_keyword.to_lowercase(),
            port_in_use: lowered(cfg.port_in_use_markers.as_slice()),
            unrecoverable: lowered(cfg.unrecoverable_markers.as_slice()),
            crash: lowered(cfg.crash_markers.as_slice()),
            port: port.to_string(),
            cfg,
            recurring: 0,
        }
    }

    /// Current value of the recurring error counter.
    #[inline]
    pub fn recurring_count(&self) -> u32 {
        self.recurring
    }

    /// Clears the recurring error counter.
    pub fn reset(&mut self) {
        self.recurring = 0;
    }

    /// Classifies one stdout line and updates the recurring error counter.
    pub fn classify_stdout(&mut self, line: &str) -> StdoutVerdict {
        let lower = line.to_lowercase();
        StdoutVerdict {
            ready: self.is_ready(line, &lower),
            recurring: self.track_recurring(&lower),
            relay: !self.is_noise(line),
        }
    }

    /// Classifies one stderr line.
    pub fn classify_stderr(&self, line: &str) -> StderrVerdict {
        let lower = line.to_lowercase();
        let hit = |markers: &[String]| markers.iter().any(|m| lower.contains(m.as_str()));
        StderrVerdict {
            port_in_use: hit(self.port_in_use.as_slice()),
            unrecoverable: hit(self.unrecoverable.as_slice()),
            crash: hit(self.crash.as_slice()),
            relay: !self.is_noise(line),
        }
    }

    fn is_ready(&self, line: &str, lower: &str) -> bool {
        if self
            .cfg
            .startup_markers
            .iter()
            .any(|m| line.contains(m.as_str()))
        {
            return true;
        }
        self.cfg.port_mention_is_ready
            && lower.contains("port")
            && line.contains(self.port.as_str())
    }

    fn track_recurring(&mut self, lower: &str) -> Recurring {
        if !lower.contains("error") {
            self.recurring = 0;
            return Recurring::Clean;
        }
        if self.keyword.is_empty() || !lower.contains(self.keyword.as_str()) {
            return Recurring::Untouched;
        }
        self.recurring += 1;
        if self.recurring >= self.cfg.recurring_threshold {
            let n = self.recurring;
            self.recurring = 0;
            Recurring::Tripped(n)
        } else {
            Recurring::Counted(self.recurring)
        }
    }

    fn is_noise(&self, line: &str) -> bool {
        self.cfg.noise.iter().any(|n| line.contains(n.as_str()))
    }
}
