//! Facade over the registry, the closing guard, the monitors and the
//! recovery engines. The presentation layer feeds it surface notifications
//! and subscribes to `SessionEvent`s. Must be used from inside a Tokio
//! runtime: timers and monitors run as spawned tasks.

use crate::config::Config;
use crate::detection::{CommandDetector, DetectedCommand, SubmitKey};
use crate::error::AppError;
use crate::events::{BannerRequest, EventBus, ReconnectOutcome, SessionEvent};
use crate::ports::highlight::HighlightRegistry;
use crate::ports::settings::{
    SettingsExt, SettingsProvider, CAT_COLORIZATION_KEY, CONNECT_TIMEOUT_KEY, SHELL_INPUT_HIGHLIGHTING_KEY,
};
use crate::ports::spawner::{HighlightOptions, LocalSpawnOptions, RemoteSpawnOptions, Spawner};
use crate::ports::surface::{tail_text, TerminalSurface};
use crate::process::{default_process_control, ProcessControl, ProcessInspector, ProcessReaper, SysinfoInspector};
use crate::reconnect::{format_status_line, AutoReconnectEngine, ReconnectPlan, ReconnectState, ReconnectTarget};
use crate::terminal::lifecycle::LifecycleManager;
use crate::terminal::model::{SessionDescriptor, TerminalId, TerminalIdentifier, TerminalInfo, TerminalKind, TerminalStatus};
use crate::terminal::registry::TerminalRegistry;
use crate::terminal::ssh_errors::{classify, decode_wait_status, is_auth_error, spawn_failure, SshErrorInfo};
use crate::terminal::status::SessionConnectionStatus;
use crate::terminal::title::{compute_title, home_dir, parse_directory_uri, DirectoryInfo};
use crate::tracking::{ConnectionMonitor, ManualSshState, ManualSshTracker, MonitorSettings};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::event_logger::TerminalEventLogger;
use crate::utils::path_utils::working_directory_or_default;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

const DEFAULT_LOCAL_TITLE: &str = "Local Terminal";
const AUTH_TAIL_ROWS: usize = 20;
const BANNER_TAIL_ROWS: usize = 50;
/// Exit code reported to the banner when auto-reconnect gives up.
const EXHAUSTED_EXIT_CODE: i32 = 1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// External collaborators the manager drives.
pub struct Collaborators {
    pub spawner: Arc<dyn Spawner>,
    pub settings: Arc<dyn SettingsProvider>,
    pub highlight: Arc<dyn HighlightRegistry>,
    pub process_control: Arc<dyn ProcessControl>,
    /// `None` disables manual SSH detection.
    pub process_inspector: Option<Arc<dyn ProcessInspector>>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Platform process control and inspection, wall clock.
    pub fn new(spawner: Arc<dyn Spawner>, settings: Arc<dyn SettingsProvider>, highlight: Arc<dyn HighlightRegistry>) -> Self {
        Self {
            spawner,
            settings,
            highlight,
            process_control: default_process_control(),
            process_inspector: SysinfoInspector::new().ok().map(|inspector| Arc::new(inspector) as Arc<dyn ProcessInspector>),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateLocalParams {
    /// Tab label when no session is given.
    pub title: Option<String>,
    pub session: Option<SessionDescriptor>,
    pub working_directory: Option<String>,
    /// Run once the shell is ready. Multi-line commands are sent line by line.
    pub execute_command: Option<String>,
    pub close_after_execute: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub terminals_created: u64,
    pub terminals_failed: u64,
    pub terminals_closed: u64,
}

#[derive(Debug)]
struct PendingCommand {
    command: String,
    close_after: bool,
}

/// Per-terminal state that lives outside the registry record.
#[derive(Debug, Default)]
struct RuntimeFlags {
    retry_in_progress: bool,
    closed_by_user: bool,
    banner_shown: bool,
    directory: Option<DirectoryInfo>,
    pending_command: Option<PendingCommand>,
    command_ran: bool,
    command_timer: Option<CancellationToken>,
    /// Pid whose failed exit was already handled.
    failed_exit_pid: Option<u32>,
}

#[derive(Debug, Default)]
struct TimeoutOverride {
    generation: u64,
    /// Value to put back once the newest override expires.
    original: Option<Value>,
}

/// A pid of 0 would address our own process group, so it counts as a failed spawn.
fn spawned_pid(result: Result<u32, AppError>) -> Result<u32, AppError> {
    match result {
        Ok(0) => Err(AppError::SpawnError("Spawner reported no process id".into())),
        other => other,
    }
}

/// Send each non-empty line of `command` to the child, then `exit` if asked.
pub fn feed_command_lines(surface: &dyn TerminalSurface, command: &str, close_after: bool) -> Result<(), AppError> {
    for line in command.trim().lines().filter(|line| !line.trim().is_empty()) {
        surface.feed_child(format!("{}\n", line).as_bytes())?;
    }
    if close_after {
        surface.feed_child(b"exit\n")?;
    }
    Ok(())
}

struct ManagerInner {
    this: Weak<ManagerInner>,
    home: Option<String>,
    registry: Arc<TerminalRegistry>,
    lifecycle: LifecycleManager,
    events: EventBus,
    spawner: Arc<dyn Spawner>,
    settings: Arc<dyn SettingsProvider>,
    highlight: Arc<dyn HighlightRegistry>,
    clock: Arc<dyn Clock>,
    monitor: ConnectionMonitor,
    tracker: ManualSshTracker,
    reconnect: AutoReconnectEngine,
    reaper: ProcessReaper,
    detector: CommandDetector,
    event_log: Option<TerminalEventLogger>,
    runtime: Mutex<HashMap<TerminalId, RuntimeFlags>>,
    stats: Mutex<ManagerStats>,
    timeout_override: Mutex<TimeoutOverride>,
    poll_token: Mutex<Option<CancellationToken>>,
    config: Config,
}

impl ManagerInner {
    fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    fn emit_status(&self, id: TerminalId) {
        if let Some(info) = self.registry.get_info(id) {
            self.emit(SessionEvent::StatusChanged {
                terminal_id: id,
                status: info.status,
            });
        }
    }

    fn log_event(&self, id: TerminalId, event: &'static str, details: Value) {
        if let Some(logger) = self.event_log.clone() {
            tokio::spawn(async move {
                logger.log_event(id, event, &details).await;
            });
        }
    }

    fn attached_surface(&self, id: TerminalId) -> Option<Arc<dyn TerminalSurface>> {
        self.registry.surface(id).filter(|surface| surface.is_attached())
    }

    /// Write text onto the terminal itself, not to the child.
    fn feed_line(&self, id: TerminalId, text: &str) {
        match self.attached_surface(id) {
            Some(surface) => surface.feed_text(text.as_bytes()),
            None => trace!(terminal_id = id, "No surface to print on"),
        }
    }

    fn highlighting_for(&self, kind: TerminalKind, session: Option<&SessionDescriptor>) -> HighlightOptions {
        let default_output = match kind {
            TerminalKind::Local => self.highlight.enabled_for_local(),
            TerminalKind::Ssh => self.highlight.enabled_for_ssh(),
            TerminalKind::Sftp => return HighlightOptions::default(),
        };
        let output = session.and_then(|s| s.output_highlighting).unwrap_or(default_output);
        if !output {
            return HighlightOptions::default();
        }
        HighlightOptions {
            output,
            cat_colorization: session
                .and_then(|s| s.cat_colorization)
                .unwrap_or_else(|| self.settings.get_bool(CAT_COLORIZATION_KEY, true)),
            shell_input: session
                .and_then(|s| s.shell_input_highlighting)
                .unwrap_or_else(|| self.settings.get_bool(SHELL_INPUT_HIGHLIGHTING_KEY, false)),
        }
    }

    fn record_spawn(&self, id: TerminalId, kind: TerminalKind, pid: u32) {
        self.registry.update_process(id, pid);
        if let Some(flags) = lock(&self.runtime).get_mut(&id) {
            flags.failed_exit_pid = None;
        }
        self.emit_status(id);
        if kind.is_remote() {
            let this = self.this.clone();
            self.monitor.watch(id, pid, move |id| {
                if let Some(inner) = this.upgrade() {
                    inner.on_connection_success(id);
                }
            });
        }
    }

    fn record_spawn_failure(&self, id: TerminalId, error: &AppError) {
        self.registry.update_status(id, TerminalStatus::SpawnFailed);
        self.registry.update_connection_status(id, false, Some(&error.to_string()));
        self.emit_status(id);
    }

    fn on_connection_success(&self, id: TerminalId) {
        if self.lifecycle.is_closing(id) {
            debug!(terminal_id = id, "Ignoring connection success while exit is processed");
            return;
        }
        self.registry.update_connection_status(id, true, None);
        self.dismiss_banner(id);
        if self.reconnect.stop(id, ReconnectOutcome::Connected) {
            info!(terminal_id = id, "Auto-reconnect succeeded");
        }
        if let Some(flags) = lock(&self.runtime).get_mut(&id) {
            flags.retry_in_progress = false;
        }
        self.emit(SessionEvent::ConnectionEstablished { terminal_id: id });
        self.emit_status(id);
        self.log_event(id, "connected", json!({}));
    }

    fn show_banner(&self, info: &TerminalInfo, error: SshErrorInfo, exit_code: Option<i32>) -> bool {
        {
            let mut runtime = lock(&self.runtime);
            let Some(flags) = runtime.get_mut(&info.id) else {
                return false;
            };
            if flags.retry_in_progress {
                debug!(terminal_id = info.id, "Skipping error banner, retry in progress");
                return false;
            }
            if flags.banner_shown {
                debug!(terminal_id = info.id, "Skipping error banner, one is already showing");
                return false;
            }
            flags.banner_shown = true;
        }
        info!(terminal_id = info.id, kind = ?error.kind, exit_code, "Showing connection error banner");
        self.emit(SessionEvent::ErrorBanner(BannerRequest {
            terminal_id: info.id,
            session_name: info.name().to_string(),
            title: error.title.to_string(),
            message: error.description,
            kind: error.kind,
            exit_code,
            actions: error.kind.banner_actions(),
        }));
        true
    }

    /// Classify a failed exit from the last screen rows and show a banner.
    fn banner_for_exit(&self, id: TerminalId, exit_code: i32) -> bool {
        let Some(info) = self.registry.get_info(id) else {
            return false;
        };
        let Some(surface) = self.attached_surface(id) else {
            debug!(terminal_id = id, "Skipping error banner, surface is gone");
            return false;
        };
        let text = tail_text(surface.as_ref(), BANNER_TAIL_ROWS);
        self.show_banner(&info, classify(exit_code, text.as_deref()), Some(exit_code))
    }

    fn dismiss_banner(&self, id: TerminalId) {
        let was_shown = lock(&self.runtime)
            .get_mut(&id)
            .map(|flags| std::mem::replace(&mut flags.banner_shown, false))
            .unwrap_or(false);
        if was_shown {
            self.emit(SessionEvent::BannerDismissed { terminal_id: id });
        }
    }

    fn handle_child_exit(&self, id: TerminalId, raw_status: i32) {
        if !self.lifecycle.mark_closing(id) {
            return;
        }
        let Some(info) = self.registry.get_info(id) else {
            self.lifecycle.unmark_closing(id);
            return;
        };
        let (closed_by_user, repeated) = match lock(&self.runtime).get_mut(&id) {
            Some(flags) => {
                let repeated = info.process_id.is_some()
                    && flags.failed_exit_pid == info.process_id
                    && matches!(info.status, TerminalStatus::Disconnected | TerminalStatus::SpawnFailed);
                if !repeated {
                    flags.retry_in_progress = false;
                }
                (flags.closed_by_user, repeated)
            }
            None => (false, false),
        };
        if repeated {
            debug!(terminal_id = id, pid = ?info.process_id, "Ignoring repeated exit notification");
            self.lifecycle.unmark_closing(id);
            return;
        }
        self.monitor.stop(id);
        if self.reaper.cancel(id) {
            debug!(terminal_id = id, "Process exited before the kill timer fired");
        }

        let exit_code = decode_wait_status(raw_status);
        let reconnecting = self.reconnect.is_active(id);

        if info.kind.is_remote() && raw_status != 0 && !closed_by_user {
            let failed_state = if info.status == TerminalStatus::Connected {
                TerminalStatus::Disconnected
            } else {
                TerminalStatus::SpawnFailed
            };
            self.lifecycle.transition(id, failed_state);
            if let Some(flags) = lock(&self.runtime).get_mut(&id) {
                flags.failed_exit_pid = info.process_id;
            }
            self.registry
                .update_connection_status(id, false, Some(&format!("exit code {}", exit_code)));
            self.emit_status(id);

            let auth_tail = self
                .registry
                .surface(id)
                .and_then(|surface| tail_text(surface.as_ref(), AUTH_TAIL_ROWS));
            let auth_error = is_auth_error(exit_code, auth_tail.as_deref());
            warn!(terminal_id = id, name = %info.name(), exit_code, auth_error, reconnecting, "Remote session failed");
            self.log_event(id, "failed", json!({ "name": info.name(), "exit_code": exit_code }));

            if auth_error && reconnecting {
                self.feed_line(id, "\r\n\x1b[31m[Auth error - auto-reconnect stopped]\x1b[0m\r\n");
                self.reconnect.stop(id, ReconnectOutcome::AuthFailure);
            }
            // A running auto-reconnect owns non-auth failures.
            if !reconnecting || auth_error {
                self.banner_for_exit(id, exit_code);
            }
            self.lifecycle.unmark_closing(id);
            return;
        }

        if info.kind.is_remote() && raw_status == 0 {
            self.dismiss_banner(id);
        }
        if !self.lifecycle.transition(id, TerminalStatus::Exited) {
            self.lifecycle.unmark_closing(id);
            return;
        }
        self.emit_status(id);
        info!(terminal_id = id, name = %info.name(), exit_code, "Terminal exited");
        self.log_event(id, "exited", json!({ "name": info.name(), "status": exit_code }));
        self.finish_close(id, exit_code);
        self.lifecycle.unmark_closing(id);
    }

    /// Report the exit to the container and release everything.
    fn finish_close(&self, id: TerminalId, exit_status: i32) {
        if self.reconnect.is_active(id) {
            warn!(terminal_id = id, "Blocked close, auto-reconnect is active");
            return;
        }
        if let Some(info) = self.registry.get_info(id) {
            self.emit(SessionEvent::TerminalExited {
                terminal_id: id,
                exit_status,
                name: info.name().to_string(),
            });
        }
        self.cleanup_terminal(id);
    }

    fn cleanup_terminal(&self, id: TerminalId) -> bool {
        if self.reconnect.is_active(id) {
            warn!(terminal_id = id, "Blocked cleanup, auto-reconnect is active");
            return false;
        }
        let Some(info) = self.registry.get_info(id) else {
            return false;
        };
        self.monitor.stop(id);
        self.tracker.untrack(id);
        self.reaper.cancel(id);
        if let Some(flags) = lock(&self.runtime).remove(&id) {
            if let Some(timer) = flags.command_timer {
                timer.cancel();
            }
        }
        info!(terminal_id = id, name = %info.name(), "Cleaning up terminal resources");
        if self.registry.unregister(id) {
            lock(&self.stats).terminals_closed += 1;
            self.log_event(id, "removed", json!({ "name": info.name() }));
            true
        } else {
            false
        }
    }

    /// Set the connect timeout for the next spawn and put the previous
    /// value back after `timeout_restore_delay`.
    fn override_connect_timeout(&self, timeout_secs: u64) {
        let generation = {
            let mut pending = lock(&self.timeout_override);
            if pending.original.is_none() {
                pending.original = Some(
                    self.settings
                        .get(CONNECT_TIMEOUT_KEY)
                        .unwrap_or_else(|| json!(self.config.default_connect_timeout_secs)),
                );
            }
            pending.generation += 1;
            pending.generation
        };
        self.settings.set(CONNECT_TIMEOUT_KEY, json!(timeout_secs), false);

        let this = self.this.clone();
        let delay = self.config.timeout_restore_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = this.upgrade() {
                inner.restore_connect_timeout(generation);
            }
        });
    }

    fn restore_connect_timeout(&self, generation: u64) {
        let original = {
            let mut pending = lock(&self.timeout_override);
            if pending.generation != generation {
                return;
            }
            pending.original.take()
        };
        if let Some(original) = original {
            debug!(value = %original, "Restoring connect timeout");
            self.settings.set(CONNECT_TIMEOUT_KEY, original, false);
        }
    }

    /// Spawn the remote session again in the same terminal and record.
    async fn respawn_in_place(&self, id: TerminalId, timeout_secs: Option<u64>) -> Result<(), AppError> {
        if self.lifecycle.is_closing(id) {
            return Err(AppError::TerminalClosing(id));
        }
        let info = self.registry.get_info(id).ok_or(AppError::TerminalNotFound(id))?;
        let session = match (info.kind.is_remote(), info.session()) {
            (true, Some(session)) => session.clone(),
            _ => return Err(AppError::NotRemote(id)),
        };
        let surface = self.attached_surface(id).ok_or(AppError::SurfaceGone(id))?;

        if let Some(timeout_secs) = timeout_secs {
            self.override_connect_timeout(timeout_secs);
        }
        self.monitor.stop(id);
        self.registry.begin_respawn(id);
        let attempts = self.registry.increment_reconnect_attempts(id);
        self.emit_status(id);

        let options = RemoteSpawnOptions {
            terminal_id: id,
            kind: info.kind,
            initial_command: session.post_login_command.clone(),
            highlighting: self.highlighting_for(info.kind, Some(&session)),
            session,
        };
        match spawned_pid(self.spawner.spawn_remote(surface, options).await) {
            Ok(pid) => {
                info!(terminal_id = id, pid, attempts, "Re-spawned remote session in place");
                self.record_spawn(id, info.kind, pid);
                Ok(())
            }
            Err(e) => {
                error!(terminal_id = id, error = %e, "Failed to re-spawn remote session");
                self.record_spawn_failure(id, &e);
                Err(e)
            }
        }
    }

    fn schedule_execute_command(&self, id: TerminalId, command: String, close_after: bool) {
        let shell_ready = {
            let mut runtime = lock(&self.runtime);
            let Some(flags) = runtime.get_mut(&id) else {
                return;
            };
            if flags.command_ran {
                return;
            }
            flags.pending_command = Some(PendingCommand { command, close_after });
            self.registry
                .surface(id)
                .is_some_and(|surface| surface.current_directory_uri().is_some())
        };
        if shell_ready {
            self.run_pending_command(id);
            return;
        }

        let token = {
            let mut runtime = lock(&self.runtime);
            let Some(flags) = runtime.get_mut(&id) else {
                return;
            };
            if flags.command_timer.is_some() {
                return;
            }
            let token = CancellationToken::new();
            flags.command_timer = Some(token.clone());
            token
        };
        let this = self.this.clone();
        let delay = self.config.execute_command_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = this.upgrade() {
                inner.run_pending_command(id);
            }
        });
    }

    /// Runs the pending command at most once per terminal.
    fn run_pending_command(&self, id: TerminalId) -> bool {
        let pending = {
            let mut runtime = lock(&self.runtime);
            let Some(flags) = runtime.get_mut(&id) else {
                return false;
            };
            if flags.command_ran {
                return false;
            }
            let Some(pending) = flags.pending_command.take() else {
                return false;
            };
            flags.command_ran = true;
            if let Some(timer) = flags.command_timer.take() {
                timer.cancel();
            }
            pending
        };
        let Some(surface) = self.attached_surface(id) else {
            debug!(terminal_id = id, "Surface gone before the startup command ran");
            return false;
        };
        match feed_command_lines(surface.as_ref(), &pending.command, pending.close_after) {
            Ok(()) => {
                debug!(terminal_id = id, close_after = pending.close_after, "Startup command sent");
                true
            }
            Err(e) => {
                error!(terminal_id = id, error = %e, "Failed to execute startup command");
                false
            }
        }
    }

    fn refresh_title(&self, id: TerminalId) {
        let Some(info) = self.registry.get_info(id) else {
            return;
        };
        let directory = lock(&self.runtime).get(&id).and_then(|flags| flags.directory.clone());
        let target = self.tracker.ssh_target(id);
        let title = compute_title(&info, target.as_deref(), directory.as_ref());
        self.emit(SessionEvent::TitleChanged { terminal_id: id, title });
    }

    fn directory_changed(&self, id: TerminalId) {
        let Some(surface) = self.registry.surface(id) else {
            return;
        };
        let uri = surface.current_directory_uri();
        let directory = uri.as_deref().and_then(|uri| parse_directory_uri(uri, self.home.as_deref()));
        match lock(&self.runtime).get_mut(&id) {
            Some(flags) => flags.directory = directory,
            None => return,
        }
        self.refresh_title(id);
        if uri.is_some() {
            self.run_pending_command(id);
        }
    }

    fn poll_manual_ssh(&self) {
        for (id, state) in self.tracker.poll_all() {
            self.emit(SessionEvent::ManualSshChanged {
                terminal_id: id,
                target: state.ssh_target.clone(),
            });
            self.refresh_title(id);
        }
    }
}

/// Hands the reconnect engine a non-owning handle so a pending run never
/// keeps the manager alive.
struct ReconnectBridge {
    inner: Weak<ManagerInner>,
}

#[async_trait]
impl ReconnectTarget for ReconnectBridge {
    fn status_line(&self, id: TerminalId, message: &str, is_error: bool) {
        if let Some(inner) = self.inner.upgrade() {
            inner.feed_line(id, &format_status_line(inner.clock.now(), message, is_error));
            inner.emit(SessionEvent::ReconnectStatus {
                terminal_id: id,
                message: message.to_string(),
                is_error,
            });
        }
    }

    fn is_closing(&self, id: TerminalId) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.lifecycle.is_closing(id))
    }

    async fn respawn(&self, id: TerminalId, timeout_secs: u64) -> Result<(), AppError> {
        let inner = self.inner.upgrade().ok_or(AppError::TerminalNotFound(id))?;
        inner.respawn_in_place(id, Some(timeout_secs)).await
    }

    fn finished(&self, id: TerminalId, outcome: ReconnectOutcome) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.emit(SessionEvent::ReconnectFinished { terminal_id: id, outcome });
        if outcome == ReconnectOutcome::Exhausted {
            // Hand control back to the user.
            inner.banner_for_exit(id, EXHAUSTED_EXIT_CODE);
        }
    }
}

/// Creates, tracks, recovers and tears down terminal sessions.
#[derive(Clone)]
pub struct TerminalManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for TerminalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalManager")
            .field("registry", &self.inner.registry)
            .field("stats", &*lock(&self.inner.stats))
            .finish_non_exhaustive()
    }
}

impl TerminalManager {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            spawner,
            settings,
            highlight,
            process_control,
            process_inspector,
            clock,
        } = collaborators;
        let registry = Arc::new(TerminalRegistry::new());

        let inner = Arc::new_cyclic(|this| ManagerInner {
            this: this.clone(),
            home: home_dir(),
            lifecycle: LifecycleManager::new(registry.clone()),
            events: EventBus::default(),
            monitor: ConnectionMonitor::new(
                MonitorSettings::from_config(&config),
                registry.clone(),
                process_control.clone(),
            ),
            tracker: ManualSshTracker::new(registry.clone(), process_inspector),
            reconnect: AutoReconnectEngine::new(clock.clone(), config.reconnect_first_delay),
            reaper: ProcessReaper::new(process_control, config.reaper_grace_period),
            detector: CommandDetector::new(highlight.clone(), settings.clone()),
            event_log: TerminalEventLogger::from_config(&config),
            registry,
            spawner,
            settings,
            highlight,
            clock,
            runtime: Mutex::new(HashMap::new()),
            stats: Mutex::new(ManagerStats::default()),
            timeout_override: Mutex::new(TimeoutOverride::default()),
            poll_token: Mutex::new(None),
            config,
        });
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TerminalRegistry> {
        &self.inner.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> ManagerStats {
        *lock(&self.inner.stats)
    }

    fn register(&self, surface: &Arc<dyn TerminalSurface>, kind: TerminalKind, identifier: TerminalIdentifier) -> TerminalId {
        let id = self.inner.registry.register(surface, kind, identifier);
        lock(&self.inner.runtime).insert(id, RuntimeFlags::default());
        id
    }

    /// Start a local shell. A spawn failure leaves the record in
    /// `spawn_failed` and is reported with a toast; the id is still returned.
    #[instrument(skip(self, surface, params), fields(title = ?params.title))]
    pub async fn create_local_terminal(
        &self,
        surface: Arc<dyn TerminalSurface>,
        params: CreateLocalParams,
    ) -> Result<TerminalId, AppError> {
        let CreateLocalParams {
            title,
            session,
            working_directory,
            execute_command,
            close_after_execute,
        } = params;
        let inner = &self.inner;
        let identifier = match &session {
            Some(session) => TerminalIdentifier::Session(session.clone()),
            None => TerminalIdentifier::Label(title.unwrap_or_else(|| DEFAULT_LOCAL_TITLE.to_string())),
        };
        let name = identifier.display_name().to_string();
        let id = self.register(&surface, TerminalKind::Local, identifier);
        inner.tracker.track(id);

        let requested_dir = working_directory
            .as_deref()
            .or_else(|| session.as_ref().and_then(|s| s.local_working_directory.as_deref()));
        let options = LocalSpawnOptions {
            terminal_id: id,
            working_directory: working_directory_or_default(requested_dir),
            highlighting: inner.highlighting_for(TerminalKind::Local, session.as_ref()),
            session: session.clone(),
        };

        match spawned_pid(inner.spawner.spawn_local(surface, options).await) {
            Ok(pid) => {
                inner.record_spawn(id, TerminalKind::Local, pid);
                let command = execute_command.or_else(|| session.and_then(|s| s.local_startup_command));
                if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
                    inner.schedule_execute_command(id, command, close_after_execute);
                }
                lock(&inner.stats).terminals_created += 1;
                info!(terminal_id = id, pid, name = %name, "Local terminal created");
                inner.log_event(id, "created", json!({ "kind": "local", "name": name }));
            }
            Err(e) => {
                error!(terminal_id = id, error = %e, "Local terminal spawn failed");
                inner.record_spawn_failure(id, &e);
                lock(&inner.stats).terminals_failed += 1;
                inner.emit(SessionEvent::Toast {
                    message: format!("Failed to start terminal: {}", e),
                });
            }
        }
        inner.refresh_title(id);
        Ok(id)
    }

    /// Connect over SSH. `initial_command` runs before the session's own
    /// post-login command.
    #[instrument(skip(self, surface, session), fields(session = %session.name))]
    pub async fn create_ssh_terminal(
        &self,
        surface: Arc<dyn TerminalSurface>,
        session: SessionDescriptor,
        initial_command: Option<String>,
    ) -> Result<TerminalId, AppError> {
        let commands: Vec<String> = initial_command
            .into_iter()
            .chain(session.post_login_command.clone())
            .filter(|c| !c.trim().is_empty())
            .collect();
        let combined = (!commands.is_empty()).then(|| commands.join("; "));
        self.create_remote_terminal(surface, session, TerminalKind::Ssh, combined).await
    }

    #[instrument(skip(self, surface, session), fields(session = %session.name))]
    pub async fn create_sftp_terminal(
        &self,
        surface: Arc<dyn TerminalSurface>,
        session: SessionDescriptor,
    ) -> Result<TerminalId, AppError> {
        self.create_remote_terminal(surface, session, TerminalKind::Sftp, None).await
    }

    /// Invalid sessions are rejected before anything is registered. A spawn
    /// failure keeps the record in `spawn_failed` behind an error banner.
    async fn create_remote_terminal(
        &self,
        surface: Arc<dyn TerminalSurface>,
        session: SessionDescriptor,
        kind: TerminalKind,
        initial_command: Option<String>,
    ) -> Result<TerminalId, AppError> {
        session.validate_remote()?;
        let inner = &self.inner;
        let id = self.register(&surface, kind, TerminalIdentifier::Session(session.clone()));
        let options = RemoteSpawnOptions {
            terminal_id: id,
            kind,
            initial_command,
            highlighting: inner.highlighting_for(kind, Some(&session)),
            session: session.clone(),
        };

        match spawned_pid(inner.spawner.spawn_remote(surface, options).await) {
            Ok(pid) => {
                inner.record_spawn(id, kind, pid);
                lock(&inner.stats).terminals_created += 1;
                info!(terminal_id = id, pid, kind = %kind, target = %session.target(), "Remote terminal created");
                inner.log_event(
                    id,
                    "created",
                    json!({ "kind": kind, "name": session.name, "target": session.target() }),
                );
            }
            Err(e) => {
                error!(terminal_id = id, kind = %kind, error = %e, "Remote terminal spawn failed");
                inner.record_spawn_failure(id, &e);
                lock(&inner.stats).terminals_failed += 1;
                if let Some(info) = inner.registry.get_info(id) {
                    inner.show_banner(&info, spawn_failure(&e.to_string()), None);
                }
            }
        }
        inner.refresh_title(id);
        Ok(id)
    }

    /// Child exit notification from the surface, with the raw wait status.
    /// Duplicate or late notifications are dropped.
    #[instrument(skip(self))]
    pub fn on_child_exited(&self, id: TerminalId, raw_status: i32) {
        self.inner.handle_child_exit(id, raw_status);
    }

    pub fn on_eof(&self, id: TerminalId) {
        self.inner.handle_child_exit(id, 0);
    }

    /// The shell reported a new working directory (OSC 7).
    pub fn on_directory_changed(&self, id: TerminalId) {
        self.inner.directory_changed(id);
    }

    /// Focus only moves local terminals between `focused` and `unfocused`;
    /// a remote record keeps its connection status.
    pub fn on_focus_changed(&self, id: TerminalId, focused: bool) -> bool {
        let inner = &self.inner;
        let Some(info) = inner.registry.get_info(id) else {
            return false;
        };
        if info.kind.is_remote() {
            return false;
        }
        let status = if focused {
            TerminalStatus::Focused
        } else {
            TerminalStatus::Unfocused
        };
        let applied = inner.lifecycle.transition(id, status);
        if applied {
            inner.emit_status(id);
        }
        applied
    }

    pub fn on_key_pressed(&self, id: TerminalId, key: SubmitKey) -> Option<DetectedCommand> {
        let surface = self.inner.registry.surface(id)?;
        self.inner.detector.on_key_pressed(id, surface.as_ref(), key)
    }

    pub fn on_line_submitted(&self, id: TerminalId, line: &str) -> Option<DetectedCommand> {
        self.inner.detector.on_line_submitted(id, line)
    }

    /// User closed the terminal. Hangs up the child (its process group when
    /// `force_kill_group`) and arms the reaper; the exit notification then
    /// finishes the teardown.
    #[instrument(skip(self))]
    pub fn remove_terminal(&self, id: TerminalId, force_kill_group: bool) -> bool {
        let inner = &self.inner;
        if inner.reconnect.cancel(id) {
            debug!(terminal_id = id, "Cancelled auto-reconnect before close");
        }
        let Some(info) = inner.registry.get_info(id) else {
            return false;
        };
        if let Some(flags) = lock(&inner.runtime).get_mut(&id) {
            flags.closed_by_user = true;
        }

        let pid = match info.process_id {
            Some(pid) if pid > 0 && !info.status.is_terminal() => pid,
            _ => {
                inner.finish_close(id, 0);
                return true;
            }
        };
        match inner.reaper.request_termination(id, pid, force_kill_group) {
            Ok(()) => debug!(terminal_id = id, pid, "Hang-up sent, waiting for exit"),
            Err(e) => {
                warn!(terminal_id = id, pid, error = %e, "Could not signal process, likely already exited");
                inner.finish_close(id, 0);
            }
        }
        true
    }

    /// The container destroyed the surface; forget the terminal.
    pub fn surface_destroyed(&self, id: TerminalId) {
        let inner = &self.inner;
        inner.registry.surface_destroyed(id);
        inner.reconnect.cancel(id);
        inner.cleanup_terminal(id);
    }

    /// Single retry in the same terminal with a temporary connect timeout
    /// (defaults to the configured one).
    #[instrument(skip(self))]
    pub async fn retry_in_same_terminal(&self, id: TerminalId, timeout_secs: Option<u64>) -> Result<(), AppError> {
        let inner = &self.inner;
        let timeout = timeout_secs
            .unwrap_or_else(|| inner.settings.get_u64(CONNECT_TIMEOUT_KEY, inner.config.default_connect_timeout_secs));
        {
            let mut runtime = lock(&inner.runtime);
            let flags = runtime.get_mut(&id).ok_or(AppError::TerminalNotFound(id))?;
            if flags.retry_in_progress {
                warn!(terminal_id = id, "Retry already in progress");
                return Err(AppError::RetryInProgress(id));
            }
            flags.retry_in_progress = true;
        }

        inner.dismiss_banner(id);
        inner.feed_line(
            id,
            &format!("\r\n\x1b[33m[Retry] Attempting reconnection with {}s timeout...\x1b[0m\r\n", timeout),
        );
        match inner.respawn_in_place(id, Some(timeout)).await {
            Ok(()) => {
                info!(terminal_id = id, timeout, "Retrying connection in the same terminal");
                Ok(())
            }
            Err(e) => {
                if let Some(flags) = lock(&inner.runtime).get_mut(&id) {
                    flags.retry_in_progress = false;
                }
                inner.feed_line(id, &format!("\r\n\x1b[31m[Retry] Failed: {}\x1b[0m\r\n", e));
                Err(e)
            }
        }
    }

    /// Start time-boxed recovery for a remote terminal. `None` uses the
    /// configured plan. Replaces any run already active for `id`.
    #[instrument(skip(self))]
    pub fn start_auto_reconnect(&self, id: TerminalId, plan: Option<ReconnectPlan>) -> Result<ReconnectState, AppError> {
        let inner = &self.inner;
        let info = inner.registry.get_info(id).ok_or(AppError::TerminalNotFound(id))?;
        if !info.kind.is_remote() || info.session().is_none() {
            return Err(AppError::NotRemote(id));
        }
        if inner.lifecycle.is_closing(id) {
            return Err(AppError::TerminalClosing(id));
        }
        if inner.attached_surface(id).is_none() {
            return Err(AppError::SurfaceGone(id));
        }
        let plan = match plan {
            Some(plan) => plan,
            None => ReconnectPlan::from_config(&inner.config)?,
        };
        inner.dismiss_banner(id);
        let target = Arc::new(ReconnectBridge {
            inner: Arc::downgrade(inner),
        });
        Ok(inner.reconnect.start(id, plan, target))
    }

    /// Idempotent. Returns whether a run was active.
    #[instrument(skip(self))]
    pub fn cancel_auto_reconnect(&self, id: TerminalId) -> bool {
        let inner = &self.inner;
        if !inner.reconnect.cancel(id) {
            return false;
        }
        inner.feed_line(id, &format_status_line(inner.clock.now(), "Cancelled by user.", false));
        info!(terminal_id = id, "Auto-reconnect cancelled");
        true
    }

    pub fn is_auto_reconnect_active(&self, id: TerminalId) -> bool {
        self.inner.reconnect.is_active(id)
    }

    pub fn reconnect_state(&self, id: TerminalId) -> Option<ReconnectState> {
        self.inner.reconnect.state(id)
    }

    /// Respawn every disconnected terminal of `session_name` in place.
    #[instrument(skip(self))]
    pub async fn reconnect_all_for_session(&self, session_name: &str) -> usize {
        let inner = &self.inner;
        let mut reconnected = 0;
        for id in inner.registry.terminals_for_session(session_name) {
            let disconnected = inner
                .registry
                .get_info(id)
                .is_some_and(|info| info.status == TerminalStatus::Disconnected);
            if !disconnected {
                continue;
            }
            match inner.respawn_in_place(id, None).await {
                Ok(()) => {
                    reconnected += 1;
                    info!(terminal_id = id, session = session_name, "Initiated reconnection");
                }
                Err(e) => error!(terminal_id = id, session = session_name, error = %e, "Failed to reconnect terminal"),
            }
        }
        reconnected
    }

    /// Cancel recovery and send `exit` to every terminal of `session_name`.
    #[instrument(skip(self))]
    pub fn disconnect_all_for_session(&self, session_name: &str) -> usize {
        let inner = &self.inner;
        let mut disconnected = 0;
        for id in inner.registry.terminals_for_session(session_name) {
            let Some(surface) = inner.registry.surface(id) else {
                continue;
            };
            self.cancel_auto_reconnect(id);
            match surface.feed_child(b"exit\n") {
                Ok(()) => {
                    disconnected += 1;
                    info!(terminal_id = id, session = session_name, "Sent disconnect");
                }
                Err(e) => error!(terminal_id = id, session = session_name, error = %e, "Failed to disconnect terminal"),
            }
        }
        disconnected
    }

    pub fn session_connection_status(&self, session_name: &str) -> SessionConnectionStatus {
        let inner = &self.inner;
        SessionConnectionStatus::from_terminals(
            inner
                .registry
                .terminals_for_session(session_name)
                .into_iter()
                .filter_map(|id| {
                    inner
                        .registry
                        .get_info(id)
                        .map(|info| (info.status, inner.reconnect.is_active(id)))
                }),
        )
    }

    pub fn has_active_ssh_sessions(&self) -> bool {
        let registry = &self.inner.registry;
        registry
            .terminals_by_kind(TerminalKind::Ssh)
            .into_iter()
            .filter_map(|id| registry.get_info(id))
            .any(|info| matches!(info.status, TerminalStatus::Running | TerminalStatus::Connected))
    }

    /// The container hid the banner (user dismissed it or acted on it).
    pub fn banner_dismissed(&self, id: TerminalId) {
        if let Some(flags) = lock(&self.inner.runtime).get_mut(&id) {
            flags.banner_shown = false;
        }
    }

    pub fn has_error_banner(&self, id: TerminalId) -> bool {
        lock(&self.inner.runtime).get(&id).is_some_and(|flags| flags.banner_shown)
    }

    pub fn manual_ssh_state(&self, id: TerminalId) -> Option<ManualSshState> {
        self.inner.tracker.state(id)
    }

    /// Poll tracked local shells for manual `ssh` every
    /// `manual_ssh_poll_interval`. No-op without process inspection or when
    /// already running.
    pub fn start_manual_ssh_polling(&self) -> bool {
        let inner = &self.inner;
        if !inner.tracker.is_enabled() {
            info!("Process inspection unavailable, manual SSH detection disabled");
            return false;
        }
        let token = {
            let mut slot = lock(&inner.poll_token);
            if slot.is_some() {
                return false;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };
        let this = Arc::downgrade(inner);
        let period = inner.config.manual_ssh_poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match this.upgrade() {
                    Some(inner) => inner.poll_manual_ssh(),
                    None => return,
                }
            }
        });
        true
    }

    /// Stop every timer task the manager owns.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if let Some(token) = lock(&inner.poll_token).take() {
            token.cancel();
        }
        inner.reconnect.cancel_all();
        inner.monitor.stop_all();
        inner.reaper.cancel_all();
        for flags in lock(&inner.runtime).values_mut() {
            if let Some(timer) = flags.command_timer.take() {
                timer.cancel();
            }
        }
        info!("Terminal manager shut down");
    }
}
