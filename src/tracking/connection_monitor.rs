use crate::config::Config;
use crate::ports::surface::tail_text;
use crate::process::signals::ProcessControl;
use crate::terminal::model::TerminalId;
use crate::terminal::registry::TerminalRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Marker carried by every status line the reconnect engine prints.
pub const RECONNECT_MARKER: &str = "[auto-reconnect]";

const ERROR_PATTERNS: &[&str] = &[
    "no route to host",
    "connection refused",
    "connection timed out",
    "permission denied",
    "authentication failed",
    "host key verification failed",
    "broken pipe",
];

const SUCCESS_PATTERNS: &[&str] = &["$", "#", "❯", "➜", "›", "last login:", "welcome to"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailVerdict {
    /// A prompt or greeting is visible and no fresh error.
    Connected,
    /// A known connection error is visible.
    Failing,
    /// Only our own reconnect status lines are visible.
    OwnStatusLines,
    Undecided,
}

/// Classify the last few screen rows. Substring heuristic: a `$` or `#`
/// anywhere in the sample counts as a prompt, so chatty banners can
/// produce false positives.
pub fn classify_tail(tail: &str) -> TailVerdict {
    let text = tail.trim().to_lowercase();
    if text.contains(RECONNECT_MARKER) {
        return TailVerdict::OwnStatusLines;
    }
    if ERROR_PATTERNS.iter().any(|p| text.contains(p)) {
        return TailVerdict::Failing;
    }
    if SUCCESS_PATTERNS.iter().any(|p| text.contains(p)) {
        return TailVerdict::Connected;
    }
    TailVerdict::Undecided
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorDecision {
    Continue,
    /// The process is gone; exit handling decides from the exit status.
    ProcessDied,
    Connected,
    /// Check budget exhausted without a decisive read.
    TimedOut { assume_connected: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub max_checks: u32,
    pub tail_lines: usize,
    pub assume_connected_on_timeout: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.connection_check_interval,
            max_checks: config.connection_max_checks,
            tail_lines: config.connection_tail_lines,
            assume_connected_on_timeout: config.assume_connected_on_timeout,
        }
    }

    /// Decide one tick. `check` is 1-based.
    pub fn evaluate(&self, check: u32, alive: bool, tail: Option<&str>) -> MonitorDecision {
        if !alive {
            return MonitorDecision::ProcessDied;
        }
        let budget_left = check < self.max_checks;
        if let Some(tail) = tail {
            match classify_tail(tail) {
                TailVerdict::OwnStatusLines if budget_left => return MonitorDecision::Continue,
                TailVerdict::OwnStatusLines => {
                    // Budget spent: judge the rows without our own lines.
                    let foreign: String = tail
                        .lines()
                        .filter(|line| !line.to_lowercase().contains(RECONNECT_MARKER))
                        .collect::<Vec<_>>()
                        .join("\n");
                    if classify_tail(&foreign) == TailVerdict::Connected {
                        return MonitorDecision::Connected;
                    }
                }
                TailVerdict::Connected => return MonitorDecision::Connected,
                TailVerdict::Failing | TailVerdict::Undecided => {}
            }
        }
        if budget_left {
            MonitorDecision::Continue
        } else {
            MonitorDecision::TimedOut {
                assume_connected: self.assume_connected_on_timeout,
            }
        }
    }
}

#[derive(Debug)]
struct Watch {
    pid: u32,
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Watches {
    next_generation: u64,
    by_id: HashMap<TerminalId, Watch>,
}

struct MonitorInner {
    settings: MonitorSettings,
    registry: Arc<TerminalRegistry>,
    control: Arc<dyn ProcessControl>,
    watches: Mutex<Watches>,
}

impl MonitorInner {
    fn watches(&self) -> MutexGuard<'_, Watches> {
        self.watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, id: TerminalId, generation: u64) -> bool {
        self.watches().by_id.get(&id).is_some_and(|w| w.generation == generation)
    }

    fn finish(&self, id: TerminalId, generation: u64) {
        let mut watches = self.watches();
        if watches.by_id.get(&id).is_some_and(|w| w.generation == generation) {
            watches.by_id.remove(&id);
        }
    }

    fn tick(&self, id: TerminalId, pid: u32, check: u32) -> MonitorDecision {
        let alive = self.control.is_alive(pid);
        if !alive {
            return self.settings.evaluate(check, false, None);
        }
        let tail = self
            .registry
            .surface(id)
            .and_then(|surface| tail_text(surface.as_ref(), self.settings.tail_lines));
        if tail.is_none() {
            debug!(terminal_id = id, pid, "No screen text available for connection check");
        }
        self.settings.evaluate(check, true, tail.as_deref())
    }
}

/// Watches a freshly spawned remote process until the screen shows a
/// prompt, the process dies, or the check budget runs out.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("settings", &self.inner.settings)
            .field("watching", &self.inner.watches().by_id.len())
            .finish()
    }
}

impl ConnectionMonitor {
    pub fn new(settings: MonitorSettings, registry: Arc<TerminalRegistry>, control: Arc<dyn ProcessControl>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                settings,
                registry,
                control,
                watches: Mutex::new(Watches::default()),
            }),
        }
    }

    /// Start watching `pid` for terminal `id`, replacing any earlier watch.
    /// `on_connected` runs once, from the monitor task, when the connection
    /// is judged established.
    pub fn watch<F>(&self, id: TerminalId, pid: u32, on_connected: F)
    where
        F: FnOnce(TerminalId) + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = {
            let mut watches = self.inner.watches();
            watches.next_generation += 1;
            let generation = watches.next_generation;
            if let Some(previous) = watches.by_id.insert(
                id,
                Watch {
                    pid,
                    generation,
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
            generation
        };
        debug!(terminal_id = id, pid, "Monitoring connection status");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut check = 0u32;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(inner.settings.interval) => {}
                }
                if !inner.is_current(id, generation) {
                    return;
                }
                check += 1;
                match inner.tick(id, pid, check) {
                    MonitorDecision::Continue => continue,
                    MonitorDecision::ProcessDied => {
                        debug!(terminal_id = id, pid, check, "Monitored process exited");
                        inner.finish(id, generation);
                        return;
                    }
                    MonitorDecision::Connected => {
                        info!(terminal_id = id, pid, check, "SSH connected");
                        inner.finish(id, generation);
                        on_connected(id);
                        return;
                    }
                    MonitorDecision::TimedOut { assume_connected: true } => {
                        info!(terminal_id = id, pid, check, "SSH appears connected (timeout)");
                        inner.finish(id, generation);
                        on_connected(id);
                        return;
                    }
                    MonitorDecision::TimedOut { assume_connected: false } => {
                        warn!(terminal_id = id, pid, check, "Connection state undecided after check budget");
                        inner.finish(id, generation);
                        return;
                    }
                }
            }
        });
    }

    pub fn stop(&self, id: TerminalId) {
        if let Some(watch) = self.inner.watches().by_id.remove(&id) {
            debug!(terminal_id = id, pid = watch.pid, "Stopped connection monitor");
            watch.token.cancel();
        }
    }

    pub fn is_watching(&self, id: TerminalId) -> bool {
        self.inner.watches().by_id.contains_key(&id)
    }

    pub fn watched_pid(&self, id: TerminalId) -> Option<u32> {
        self.inner.watches().by_id.get(&id).map(|w| w.pid)
    }

    pub fn stop_all(&self) {
        for (_, watch) in self.inner.watches().by_id.drain() {
            watch.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MonitorSettings {
        MonitorSettings::from_config(&Config::default())
    }

    #[test]
    fn permission_denied_is_never_success() {
        let tail = "user@host's password:\nPermission denied, please try again.\nuser@host's password: ";
        assert_eq!(classify_tail(tail), TailVerdict::Failing);
        assert_eq!(settings().evaluate(1, true, Some(tail)), MonitorDecision::Continue);
    }

    #[test]
    fn shell_prompt_is_success() {
        assert_eq!(classify_tail("user@host:~$ "), TailVerdict::Connected);
        assert_eq!(settings().evaluate(1, true, Some("user@host:~$ ")), MonitorDecision::Connected);
        assert_eq!(classify_tail("Last login: Mon Oct 19 10:00:01 2026"), TailVerdict::Connected);
        assert_eq!(classify_tail("~/src ❯"), TailVerdict::Connected);
    }

    #[test]
    fn own_status_lines_are_skipped_while_budget_remains() {
        let tail = "[10:00:01] [Auto-Reconnect] Attempt 1/30 - Time remaining: 4m 59s";
        assert_eq!(classify_tail(tail), TailVerdict::OwnStatusLines);
        assert_eq!(settings().evaluate(3, true, Some(tail)), MonitorDecision::Continue);
    }

    #[test]
    fn dead_process_stops_monitoring() {
        assert_eq!(settings().evaluate(1, false, Some("user@host:~$ ")), MonitorDecision::ProcessDied);
    }

    #[test]
    fn exhausted_budget_follows_the_assumption_flag() {
        let mut s = settings();
        assert_eq!(
            s.evaluate(10, true, Some("connecting...")),
            MonitorDecision::TimedOut { assume_connected: true }
        );
        s.assume_connected_on_timeout = false;
        assert_eq!(
            s.evaluate(10, true, Some("Connection timed out")),
            MonitorDecision::TimedOut { assume_connected: false }
        );
    }

    #[test]
    fn last_check_looks_past_own_status_lines() {
        let tail = "[10:00:01] [Auto-Reconnect] Attempt 2/30\nroot@box:~# ";
        assert_eq!(settings().evaluate(10, true, Some(tail)), MonitorDecision::Connected);
    }
}
