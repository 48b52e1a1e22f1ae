#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use procvisor::{
    CommandSpec, Event, EventKind, ExitInfo, HealthProbe, OutputSink, PortReaper, ProbeOutcome,
    ProcessHandle, ReapError, SpawnError, Spawner, StartError, Supervisor, SupervisorConfig,
};

pub const PORT: u16 = 3001;
const WAIT: Duration = Duration::from_secs(600);

// ---- Process layer ----

struct Control {
    exit: watch::Sender<Option<ExitInfo>>,
    terminated: AtomicBool,
    killed: AtomicBool,
    ignore_term: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl Control {
    fn finish(&self, info: ExitInfo) {
        let first = self.exit.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(info);
                true
            } else {
                false
            }
        });
        if first {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Test-side view of a spawned fake child.
pub struct FakeChild {
    pub pid: u32,
    pub sink: OutputSink,
    control: Arc<Control>,
}

impl FakeChild {
    pub fn ready(&self) {
        self.sink.stdout(format!("Server running on port {PORT}"));
    }

    pub fn stdout(&self, line: &str) {
        self.sink.stdout(line);
    }

    pub fn stderr(&self, line: &str) {
        self.sink.stderr(line);
    }

    /// The child exits on its own with `code`.
    pub fn exit(&self, code: i32) {
        let info = ExitInfo::code(code);
        self.control.finish(info);
        self.sink.exited(info);
    }

    /// The child ignores SIGTERM and only dies on SIGKILL.
    pub fn ignore_sigterm(&self) {
        self.control.ignore_term.store(true, Ordering::SeqCst);
    }

    pub fn was_terminated(&self) -> bool {
        self.control.terminated.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.control.killed.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.control.exit.borrow().is_none()
    }
}

struct FakeProcess {
    pid: u32,
    exit: watch::Receiver<Option<ExitInfo>>,
    control: Arc<Control>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    fn terminate(&self) -> io::Result<()> {
        self.control.terminated.store(true, Ordering::SeqCst);
        if !self.control.ignore_term.load(Ordering::SeqCst) {
            self.control.finish(ExitInfo::signal(15));
        }
        Ok(())
    }

    fn kill(&self) -> io::Result<()> {
        self.control.killed.store(true, Ordering::SeqCst);
        self.control.finish(ExitInfo::signal(9));
        Ok(())
    }

    async fn wait_exit(&self, within: Duration) -> Option<ExitInfo> {
        let mut rx = self.exit.clone();
        let exited = match tokio::time::timeout(within, rx.wait_for(Option::is_some)).await {
            Ok(Ok(info)) => *info,
            _ => None,
        };
        exited
    }
}

/// Spawner handing every child to the test through a channel.
pub struct FakeSpawner {
    children: mpsc::UnboundedSender<FakeChild>,
    next_pid: AtomicU32,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    spawned: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeSpawner {
    fn new(children: mpsc::UnboundedSender<FakeChild>) -> Self {
        Self {
            children,
            next_pid: AtomicU32::new(1000),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Largest number of simultaneously live children ever observed.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(
        &self,
        _cmd: &CommandSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SpawnError::Rejected("scripted failure".into()));
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (exit, rx) = watch::channel(None);
        let control = Arc::new(Control {
            exit,
            terminated: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            ignore_term: AtomicBool::new(false),
            live: Arc::clone(&self.live),
        });
        let _ = self.children.send(FakeChild {
            pid,
            sink,
            control: Arc::clone(&control),
        });
        Ok(Box::new(FakeProcess {
            pid,
            exit: rx,
            control,
        }))
    }
}

// ---- Health ----

/// Probe answering from a script, then with a fixed fallback.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: Mutex<ProbeOutcome>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ProbeOutcome::Healthy),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, outcome: ProbeOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn always(&self, outcome: ProbeOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Makes every check take `delay` before answering.
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        let outcome = scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

// ---- Port reaper ----

/// Reaper reporting a fixed set of stray pids and recording kills.
#[derive(Default)]
pub struct RecordingReaper {
    strays: Mutex<Vec<u32>>,
    killed: Mutex<Vec<u32>>,
    lookups: AtomicUsize,
}

impl RecordingReaper {
    pub fn set_strays(&self, pids: Vec<u32>) {
        *self.strays.lock().unwrap() = pids;
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortReaper for RecordingReaper {
    async fn pids_on_port(&self, port: u16) -> Result<Vec<u32>, ReapError> {
        assert_eq!(port, PORT);
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(std::mem::take(&mut *self.strays.lock().unwrap()))
    }

    async fn kill(&self, pid: u32) -> Result<(), ReapError> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}

// ---- Harness ----

pub struct Harness {
    pub sup: Supervisor,
    pub spawner: Arc<FakeSpawner>,
    pub probe: Arc<ScriptedProbe>,
    pub reaper: Arc<RecordingReaper>,
    children: mpsc::UnboundedReceiver<FakeChild>,
}

impl Harness {
    /// Builds a supervisor on fake capabilities; `tweak` adjusts the config.
    pub fn new(tweak: impl FnOnce(&mut SupervisorConfig)) -> Self {
        let mut cfg = SupervisorConfig::new(CommandSpec::new("fake-server"), PORT);
        tweak(&mut cfg);

        let (tx, children) = mpsc::unbounded_channel();
        let spawner = Arc::new(FakeSpawner::new(tx));
        let probe = Arc::new(ScriptedProbe::new());
        let reaper = Arc::new(RecordingReaper::default());

        let sup = Supervisor::builder(cfg)
            .with_spawner(spawner.clone())
            .with_probe(probe.clone())
            .with_reaper(reaper.clone())
            .build()
            .expect("valid config");

        Self {
            sup,
            spawner,
            probe,
            reaper,
            children,
        }
    }

    /// Calls `start()` on a separate task.
    pub fn start(&self) -> JoinHandle<Result<(), StartError>> {
        let sup = self.sup.clone();
        tokio::spawn(async move { sup.start().await })
    }

    /// Starts the supervisor and completes startup with the marker.
    pub async fn start_ready(&mut self) -> FakeChild {
        let start = self.start();
        let child = self.next_child().await;
        child.ready();
        start.await.expect("join").expect("startup");
        child
    }

    pub async fn next_child(&mut self) -> FakeChild {
        tokio::time::timeout(WAIT, self.children.recv())
            .await
            .expect("no spawn in time")
            .expect("spawner dropped")
    }

    /// Returns `true` if no child was spawned since the last `next_child()`.
    pub fn no_new_child(&mut self) -> bool {
        self.children.try_recv().is_err()
    }
}

/// Waits for the next event of `kind`, skipping others.
pub async fn expect_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed waiting for {kind:?}"),
            }
        }
    })
    .await;
    found.unwrap_or_else(|_| panic!("no {kind:?} event in time"))
}

/// Drains already published events.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    kinds
}
