#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terminal_session_engine::config::Config;
use terminal_session_engine::error::AppError;
use terminal_session_engine::events::SessionEvent;
use terminal_session_engine::ports::{
    BufferSurface, LocalSpawnOptions, MemorySettings, RemoteSpawnOptions, Spawner, StaticHighlightRegistry,
    TerminalSurface,
};
use terminal_session_engine::process::{ProcessControl, ProcessEntry, ProcessInspector};
use terminal_session_engine::terminal::{Collaborators, SessionDescriptor, TerminalId, TerminalManager, TerminalStatus};
use terminal_session_engine::utils::TokioClock;
use tokio::sync::broadcast;

pub const REMOTE_PROMPT: &str = "Last login: Mon Oct 19 09:12:44 2026\nadmin@web-01:~$ ";

/// Raw wait status for a child that exited with `code`.
pub fn exit_status(code: i32) -> i32 {
    code << 8
}

/// Process table shared by the fake spawner and the fake signal sender.
#[derive(Default)]
pub struct FakeProcesses {
    alive: Mutex<HashSet<u32>>,
    pub hangups: Mutex<Vec<(u32, bool)>>,
    pub kills: Mutex<Vec<u32>>,
}

impl FakeProcesses {
    pub fn start(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }

    pub fn exit(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    /// Hang-ups are recorded but leave the process running, like a shell
    /// that ignores SIGHUP.
    pub fn hangups(&self) -> Vec<(u32, bool)> {
        self.hangups.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<u32> {
        self.kills.lock().unwrap().clone()
    }
}

impl ProcessControl for FakeProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    fn hangup(&self, pid: u32, group: bool) -> Result<(), AppError> {
        if !self.is_alive(pid) {
            return Err(AppError::ProcessGone(pid));
        }
        self.hangups.lock().unwrap().push((pid, group));
        Ok(())
    }

    fn kill_group(&self, pid: u32) -> Result<(), AppError> {
        if !self.is_alive(pid) {
            return Err(AppError::ProcessGone(pid));
        }
        self.exit(pid);
        self.kills.lock().unwrap().push(pid);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum SpawnCall {
    Local(LocalSpawnOptions),
    Remote(RemoteSpawnOptions),
}

/// Hands out increasing pids and prints a login prompt for remote spawns.
pub struct FakeSpawner {
    processes: Arc<FakeProcesses>,
    next_pid: AtomicU32,
    no_pid: AtomicBool,
    remote_failures: Mutex<VecDeque<String>>,
    local_failure: Mutex<Option<String>>,
    remote_output: Mutex<Option<String>>,
    calls: Mutex<Vec<SpawnCall>>,
}

impl FakeSpawner {
    pub fn new(processes: Arc<FakeProcesses>) -> Self {
        Self {
            processes,
            next_pid: AtomicU32::new(4000),
            no_pid: AtomicBool::new(false),
            remote_failures: Mutex::new(VecDeque::new()),
            local_failure: Mutex::new(None),
            remote_output: Mutex::new(Some(REMOTE_PROMPT.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The next `count` remote spawns fail.
    pub fn fail_next_remote(&self, count: usize, message: &str) {
        let mut failures = self.remote_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(message.to_string());
        }
    }

    /// Spawns "succeed" but report pid 0.
    pub fn report_no_pid(&self) {
        self.no_pid.store(true, Ordering::SeqCst);
    }

    pub fn fail_local(&self, message: &str) {
        *self.local_failure.lock().unwrap() = Some(message.to_string());
    }

    /// What a successful remote spawn prints; `None` prints nothing.
    pub fn set_remote_output(&self, output: Option<&str>) {
        *self.remote_output.lock().unwrap() = output.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<SpawnCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remote_calls(&self) -> Vec<RemoteSpawnOptions> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SpawnCall::Remote(options) => Some(options),
                SpawnCall::Local(_) => None,
            })
            .collect()
    }

    pub fn local_calls(&self) -> Vec<LocalSpawnOptions> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SpawnCall::Local(options) => Some(options),
                SpawnCall::Remote(_) => None,
            })
            .collect()
    }

    fn next_pid(&self) -> u32 {
        if self.no_pid.load(Ordering::SeqCst) {
            return 0;
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.start(pid);
        pid
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn_local(&self, _surface: Arc<dyn TerminalSurface>, options: LocalSpawnOptions) -> Result<u32, AppError> {
        self.calls.lock().unwrap().push(SpawnCall::Local(options));
        if let Some(message) = self.local_failure.lock().unwrap().clone() {
            return Err(AppError::SpawnError(message));
        }
        Ok(self.next_pid())
    }

    async fn spawn_remote(&self, surface: Arc<dyn TerminalSurface>, options: RemoteSpawnOptions) -> Result<u32, AppError> {
        self.calls.lock().unwrap().push(SpawnCall::Remote(options));
        if let Some(message) = self.remote_failures.lock().unwrap().pop_front() {
            return Err(AppError::SpawnError(message));
        }
        if let Some(output) = self.remote_output.lock().unwrap().clone() {
            surface.feed_text(output.as_bytes());
        }
        Ok(self.next_pid())
    }
}

/// Short timers so paused-time tests stay readable.
pub fn test_config() -> Config {
    Config {
        connection_check_interval: Duration::from_millis(100),
        connection_max_checks: 3,
        connection_tail_lines: 5,
        assume_connected_on_timeout: false,
        reaper_grace_period: Duration::from_secs(2),
        reconnect_first_delay: Duration::from_millis(500),
        timeout_restore_delay: Duration::from_secs(1),
        execute_command_delay: Duration::from_millis(500),
        ..Config::default()
    }
}

pub struct Harness {
    pub manager: TerminalManager,
    pub spawner: Arc<FakeSpawner>,
    pub processes: Arc<FakeProcesses>,
    pub settings: Arc<MemorySettings>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::with_highlight(config, StaticHighlightRegistry::new(["cat", "ls", "git"]))
    }

    pub fn with_highlight(config: Config, highlight: StaticHighlightRegistry) -> Self {
        Self::build(config, highlight, None)
    }

    pub fn build(
        config: Config,
        highlight: StaticHighlightRegistry,
        process_inspector: Option<Arc<dyn ProcessInspector>>,
    ) -> Self {
        let processes = Arc::new(FakeProcesses::default());
        let spawner = Arc::new(FakeSpawner::new(processes.clone()));
        let settings = Arc::new(MemorySettings::new());
        let manager = TerminalManager::new(
            config,
            Collaborators {
                spawner: spawner.clone(),
                settings: settings.clone(),
                highlight: Arc::new(highlight),
                process_control: processes.clone(),
                process_inspector,
                clock: Arc::new(TokioClock::new()),
            },
        );
        let events = manager.subscribe();
        Self {
            manager,
            spawner,
            processes,
            settings,
            events,
        }
    }

    /// Everything emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A surface the test keeps alive; the manager only holds it weakly.
pub fn surface() -> (Arc<BufferSurface>, Arc<dyn TerminalSurface>) {
    let buffer = Arc::new(BufferSurface::new(120));
    let dynamic: Arc<dyn TerminalSurface> = buffer.clone();
    (buffer, dynamic)
}

pub fn web_session() -> SessionDescriptor {
    SessionDescriptor::ssh("web-01", "web-01.example.com", "admin")
}

pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Process tree below every shell: whatever the test puts in.
#[derive(Default)]
pub struct FakeInspector {
    children: Mutex<Vec<ProcessEntry>>,
}

impl FakeInspector {
    pub fn set_children(&self, children: Vec<ProcessEntry>) {
        *self.children.lock().unwrap() = children;
    }
}

impl ProcessInspector for FakeInspector {
    fn child_count(&self, _pid: u32) -> Result<usize, AppError> {
        Ok(self.children.lock().unwrap().len())
    }

    fn descendants(&self, _pid: u32) -> Result<Vec<ProcessEntry>, AppError> {
        Ok(self.children.lock().unwrap().clone())
    }
}

/// An SSH terminal that connected and then lost its connection.
pub async fn dropped_connection(h: &mut Harness) -> (Arc<BufferSurface>, TerminalId) {
    let (buffer, surface) = surface();
    let id = h.manager.create_ssh_terminal(surface, web_session(), None).await.unwrap();
    settle(Duration::from_millis(150)).await;
    assert_eq!(h.manager.registry().get_info(id).unwrap().status, TerminalStatus::Connected);

    buffer.write_output("\r\nConnection reset by peer\r\n");
    let pid = h.manager.registry().get_info(id).unwrap().process_id.unwrap();
    h.processes.exit(pid);
    h.manager.on_child_exited(id, exit_status(255));
    (buffer, id)
}
