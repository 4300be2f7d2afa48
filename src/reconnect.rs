use crate::config::Config;
use crate::error::AppError;
use crate::events::ReconnectOutcome;
use crate::terminal::model::TerminalId;
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// One week.
pub const MAX_DURATION_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_INTERVAL_SECS: u64 = 60 * 60;
pub const MAX_TIMEOUT_SECS: u64 = 10 * 60;

/// One inline status line, e.g.
/// `\r\n[2026-10-19 10:00:00] [Auto-Reconnect] Attempt 1/30 ...\r\n`.
pub fn format_status_line(at: DateTime<Utc>, message: &str, is_error: bool) -> String {
    let color = if is_error { RED } else { YELLOW };
    let timestamp = at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    format!("\r\n{DIM}[{timestamp}]{RESET} {color}[Auto-Reconnect] {message}{RESET}\r\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectPlan {
    pub duration_minutes: u64,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl ReconnectPlan {
    pub fn new(duration_minutes: u64, interval_secs: u64, timeout_secs: u64) -> Result<Self, AppError> {
        if duration_minutes == 0 {
            return Err(AppError::InvalidInputArgument("Reconnect duration must be at least one minute".into()));
        }
        if duration_minutes > MAX_DURATION_MINUTES {
            return Err(AppError::InvalidInputArgument(format!(
                "Reconnect duration must not exceed {} minutes",
                MAX_DURATION_MINUTES
            )));
        }
        if interval_secs == 0 {
            return Err(AppError::InvalidInputArgument("Reconnect interval must be at least one second".into()));
        }
        if interval_secs > MAX_INTERVAL_SECS {
            return Err(AppError::InvalidInputArgument(format!(
                "Reconnect interval must not exceed {} seconds",
                MAX_INTERVAL_SECS
            )));
        }
        Ok(Self {
            duration_minutes,
            interval_secs,
            timeout_secs: timeout_secs.clamp(1, MAX_TIMEOUT_SECS),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.reconnect_duration_minutes,
            config.reconnect_interval_secs,
            config.reconnect_timeout_secs,
        )
    }

    fn window_secs(&self) -> u64 {
        self.duration_minutes.saturating_mul(60)
    }

    pub fn window(&self) -> ChronoDuration {
        i64::try_from(self.window_secs())
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.window_secs() / self.interval_secs.max(1)).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub end_time: DateTime<Utc>,
    pub cancelled: bool,
    pub active: bool,
}

/// What the engine drives. Implemented by the terminal manager.
#[async_trait]
pub trait ReconnectTarget: Send + Sync {
    /// Print a progress line on the terminal.
    fn status_line(&self, id: TerminalId, message: &str, is_error: bool);

    /// Whether `id` is currently processing an exit event.
    fn is_closing(&self, id: TerminalId) -> bool;

    /// Spawn the remote session again in the same terminal with the given
    /// connect timeout.
    async fn respawn(&self, id: TerminalId, timeout_secs: u64) -> Result<(), AppError>;

    /// The run is over. Called exactly once per started run.
    fn finished(&self, id: TerminalId, outcome: ReconnectOutcome);
}

struct Run {
    generation: u64,
    token: CancellationToken,
    state: ReconnectState,
    target: Arc<dyn ReconnectTarget>,
}

#[derive(Default)]
struct Runs {
    next_generation: u64,
    by_id: HashMap<TerminalId, Run>,
}

struct EngineInner {
    clock: Arc<dyn Clock>,
    first_delay: Duration,
    runs: Mutex<Runs>,
}

enum Tick {
    Stop,
    Next(Duration),
}

impl EngineInner {
    fn runs(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, id: TerminalId, generation: u64) -> bool {
        self.runs().by_id.get(&id).is_some_and(|r| r.generation == generation)
    }

    /// Remove the run if it is still `generation` and report `outcome`.
    fn complete(&self, id: TerminalId, generation: u64, outcome: ReconnectOutcome) {
        let removed = {
            let mut runs = self.runs();
            if runs.by_id.get(&id).is_some_and(|r| r.generation == generation) {
                runs.by_id.remove(&id)
            } else {
                None
            }
        };
        if let Some(mut run) = removed {
            run.state.active = false;
            run.token.cancel();
            info!(terminal_id = id, attempts = run.state.attempt, ?outcome, "Auto-reconnect finished");
            run.target.finished(id, outcome);
        }
    }

    fn next_attempt(&self, id: TerminalId, generation: u64) -> Option<(u32, u32, DateTime<Utc>)> {
        let mut runs = self.runs();
        let run = runs.by_id.get_mut(&id).filter(|r| r.generation == generation)?;
        if run.state.cancelled {
            return None;
        }
        run.state.attempt += 1;
        Some((run.state.attempt, run.state.max_attempts, run.state.end_time))
    }

    async fn attempt(&self, id: TerminalId, generation: u64, plan: ReconnectPlan, target: &Arc<dyn ReconnectTarget>) -> Tick {
        if !self.is_current(id, generation) {
            return Tick::Stop;
        }
        if target.is_closing(id) {
            debug!(terminal_id = id, "Terminal is closing, abandoning auto-reconnect");
            self.complete(id, generation, ReconnectOutcome::Cancelled);
            return Tick::Stop;
        }

        let now = self.clock.now();
        let end_time = match self.runs().by_id.get(&id) {
            Some(run) => run.state.end_time,
            None => return Tick::Stop,
        };
        if now >= end_time {
            target.status_line(id, "Time limit reached. Giving up.", true);
            target.status_line(id, "Showing connection options...", false);
            self.complete(id, generation, ReconnectOutcome::Exhausted);
            return Tick::Stop;
        }

        let Some((attempt, max_attempts, _)) = self.next_attempt(id, generation) else {
            return Tick::Stop;
        };
        let remaining = (end_time - now).num_seconds().max(0);
        target.status_line(
            id,
            &format!(
                "Attempt {}/{} - Time remaining: {}m {}s",
                attempt,
                max_attempts,
                remaining / 60,
                remaining % 60
            ),
            false,
        );
        info!(terminal_id = id, attempt, max_attempts, "Auto-reconnect attempt");

        match target.respawn(id, plan.timeout_secs).await {
            Ok(()) => {}
            Err(e @ (AppError::TerminalClosing(_) | AppError::SurfaceGone(_) | AppError::TerminalNotFound(_))) => {
                debug!(terminal_id = id, error = %e, "Terminal went away during auto-reconnect");
                self.complete(id, generation, ReconnectOutcome::Cancelled);
                return Tick::Stop;
            }
            Err(e) => {
                warn!(terminal_id = id, attempt, error = %e, "Auto-reconnect spawn error");
                target.status_line(id, &format!("Spawn error: {}", e), true);
            }
        }

        // Cancelled or finished while the respawn was in flight.
        if !self.is_current(id, generation) {
            return Tick::Stop;
        }

        let next_at = i64::try_from(plan.interval_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|interval| self.clock.now().checked_add_signed(interval))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if attempt < max_attempts && next_at < end_time {
            Tick::Next(plan.interval())
        } else {
            target.status_line(id, "Maximum attempts reached.", true);
            target.status_line(id, "Showing connection options...", false);
            self.complete(id, generation, ReconnectOutcome::Exhausted);
            Tick::Stop
        }
    }
}

/// Time-boxed retry loop that respawns a remote session in place. At most
/// one run exists per terminal; the deadline is wall-clock based.
#[derive(Clone)]
pub struct AutoReconnectEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for AutoReconnectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoReconnectEngine")
            .field("first_delay", &self.inner.first_delay)
            .field("active", &self.inner.runs().by_id.len())
            .finish()
    }
}

impl AutoReconnectEngine {
    pub fn new(clock: Arc<dyn Clock>, first_delay: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                clock,
                first_delay,
                runs: Mutex::new(Runs::default()),
            }),
        }
    }

    /// Start recovering `id`. A run already active for `id` is stopped and
    /// reported as superseded first.
    pub fn start(&self, id: TerminalId, plan: ReconnectPlan, target: Arc<dyn ReconnectTarget>) -> ReconnectState {
        let now = self.inner.clock.now();
        let state = ReconnectState {
            attempt: 0,
            max_attempts: plan.max_attempts(),
            end_time: now.checked_add_signed(plan.window()).unwrap_or(DateTime::<Utc>::MAX_UTC),
            cancelled: false,
            active: true,
        };
        let token = CancellationToken::new();

        let (generation, previous) = {
            let mut runs = self.inner.runs();
            runs.next_generation += 1;
            let generation = runs.next_generation;
            let previous = runs.by_id.insert(
                id,
                Run {
                    generation,
                    token: token.clone(),
                    state: state.clone(),
                    target: target.clone(),
                },
            );
            (generation, previous)
        };
        if let Some(previous) = previous {
            previous.token.cancel();
            info!(terminal_id = id, "Replacing active auto-reconnect");
            previous.target.finished(id, ReconnectOutcome::Superseded);
        }

        info!(
            terminal_id = id,
            max_attempts = state.max_attempts,
            duration_minutes = plan.duration_minutes,
            interval_secs = plan.interval_secs,
            "Starting auto-reconnect"
        );
        target.status_line(
            id,
            &format!(
                "Starting auto-reconnect: {} attempts over {} minute(s), every {}s",
                state.max_attempts, plan.duration_minutes, plan.interval_secs
            ),
            false,
        );
        target.status_line(id, "Close this tab to cancel.", false);

        let inner = self.inner.clone();
        let first_delay = self.inner.first_delay;
        tokio::spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                match inner.attempt(id, generation, plan, &target).await {
                    Tick::Next(next) => delay = next,
                    Tick::Stop => return,
                }
            }
        });
        state
    }

    /// Stop the run for `id` with `outcome`. Returns false when nothing was
    /// running. Safe to call at any time and any number of times.
    pub fn stop(&self, id: TerminalId, outcome: ReconnectOutcome) -> bool {
        let generation = {
            let mut runs = self.inner.runs();
            match runs.by_id.get_mut(&id) {
                Some(run) => {
                    run.state.cancelled = outcome == ReconnectOutcome::Cancelled;
                    run.token.cancel();
                    run.generation
                }
                None => return false,
            }
        };
        self.inner.complete(id, generation, outcome);
        true
    }

    pub fn cancel(&self, id: TerminalId) -> bool {
        self.stop(id, ReconnectOutcome::Cancelled)
    }

    pub fn is_active(&self, id: TerminalId) -> bool {
        self.inner.runs().by_id.contains_key(&id)
    }

    pub fn state(&self, id: TerminalId) -> Option<ReconnectState> {
        self.inner.runs().by_id.get(&id).map(|r| r.state.clone())
    }

    pub fn active_ids(&self) -> Vec<TerminalId> {
        let mut ids: Vec<_> = self.inner.runs().by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn cancel_all(&self) {
        for id in self.active_ids() {
            self.cancel(id);
        }
    }
}
