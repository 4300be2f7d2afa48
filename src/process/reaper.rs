use crate::error::AppError;
use crate::process::signals::ProcessControl;
use crate::terminal::model::TerminalId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct PendingKill {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct ReaperState {
    next_generation: u64,
    pending: HashMap<TerminalId, PendingKill>,
}

/// Makes sure a hung-up child process group is really gone. A grace timer
/// is armed per terminal; when it fires and the process still answers the
/// liveness probe, the whole group is killed.
pub struct ProcessReaper {
    control: Arc<dyn ProcessControl>,
    grace_period: Duration,
    state: Arc<Mutex<ReaperState>>,
}

impl std::fmt::Debug for ProcessReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessReaper")
            .field("grace_period", &self.grace_period)
            .field("pending", &lock(&self.state).pending.len())
            .finish()
    }
}

fn lock(state: &Mutex<ReaperState>) -> MutexGuard<'_, ReaperState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessReaper {
    pub fn new(control: Arc<dyn ProcessControl>, grace_period: Duration) -> Self {
        Self {
            control,
            grace_period,
            state: Arc::new(Mutex::new(ReaperState::default())),
        }
    }

    /// Send SIGHUP (to the group when `group`) and arm the grace timer.
    /// `Err(ProcessGone)` means there was nothing to terminate and no timer
    /// was armed.
    pub fn request_termination(&self, id: TerminalId, pid: u32, group: bool) -> Result<(), AppError> {
        self.control.hangup(pid, group)?;
        self.arm(id, pid);
        Ok(())
    }

    /// Arm (or re-arm) the grace timer for `id`. Must be called from
    /// inside a tokio runtime.
    pub fn arm(&self, id: TerminalId, pid: u32) {
        let token = CancellationToken::new();
        let generation = {
            let mut state = lock(&self.state);
            state.next_generation += 1;
            let generation = state.next_generation;
            if let Some(previous) = state.pending.insert(
                id,
                PendingKill {
                    generation,
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
            generation
        };

        let control = self.control.clone();
        let state = self.state.clone();
        let grace = self.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(terminal_id = id, pid, "Reaper timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(grace) => {}
            }
            {
                let mut guard = lock(&state);
                if guard.pending.get(&id).map(|p| p.generation) == Some(generation) {
                    guard.pending.remove(&id);
                }
            }
            if !control.is_alive(pid) {
                debug!(terminal_id = id, pid, "Process exited within grace period");
                return;
            }
            warn!(terminal_id = id, pid, grace_ms = grace.as_millis() as u64, "Process survived SIGHUP, killing process group");
            match control.kill_group(pid) {
                Ok(()) => info!(terminal_id = id, pid, "Process group killed"),
                Err(e) if e.is_process_gone() => debug!(terminal_id = id, pid, "Process vanished before SIGKILL"),
                Err(e) => warn!(terminal_id = id, pid, error = %e, "Failed to kill process group"),
            }
        });
    }

    /// Disarm the timer because a normal exit notification arrived.
    pub fn cancel(&self, id: TerminalId) -> bool {
        match lock(&self.state).pending.remove(&id) {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: TerminalId) -> bool {
        lock(&self.state).pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn cancel_all(&self) {
        for (_, pending) in lock(&self.state).pending.drain() {
            pending.token.cancel();
        }
    }
}
