use crate::process::inspect::{ProcessEntry, ProcessInspector};
use crate::terminal::model::{TerminalId, TerminalKind};
use crate::terminal::registry::TerminalRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManualSshState {
    pub in_ssh: bool,
    pub ssh_target: Option<String>,
}

#[derive(Debug, Default)]
struct Tracked {
    state: ManualSshState,
    last_child_count: Option<usize>,
}

/// Detects `ssh` launched by hand inside a local shell by looking at the
/// shell's process tree. Heuristic: anything named `ssh` below the shell
/// counts, including one started by a script or a background job.
pub struct ManualSshTracker {
    registry: Arc<TerminalRegistry>,
    inspector: Option<Arc<dyn ProcessInspector>>,
    tracked: Mutex<HashMap<TerminalId, Tracked>>,
}

impl std::fmt::Debug for ManualSshTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualSshTracker")
            .field("enabled", &self.inspector.is_some())
            .field("tracked", &self.lock().len())
            .finish()
    }
}

/// `user@host` argument of an ssh command line, else the binary name.
pub fn ssh_target_from(entry: &ProcessEntry) -> String {
    entry
        .cmdline
        .iter()
        .find(|arg| arg.contains('@'))
        .cloned()
        .unwrap_or_else(|| entry.name.clone())
}

impl ManualSshTracker {
    /// With no inspector every check is a no-op and manual SSH is never
    /// detected.
    pub fn new(registry: Arc<TerminalRegistry>, inspector: Option<Arc<dyn ProcessInspector>>) -> Self {
        Self {
            registry,
            inspector,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TerminalId, Tracked>> {
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.inspector.is_some()
    }

    pub fn track(&self, id: TerminalId) {
        self.lock().entry(id).or_default();
    }

    pub fn untrack(&self, id: TerminalId) {
        self.lock().remove(&id);
    }

    pub fn is_tracked(&self, id: TerminalId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn tracked_ids(&self) -> Vec<TerminalId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn state(&self, id: TerminalId) -> Option<ManualSshState> {
        self.lock().get(&id).map(|t| t.state.clone())
    }

    /// Target of the manual SSH session, only while one is active.
    pub fn ssh_target(&self, id: TerminalId) -> Option<String> {
        self.lock()
            .get(&id)
            .filter(|t| t.state.in_ssh)
            .and_then(|t| t.state.ssh_target.clone())
    }

    /// One poll for one terminal. Returns the new state when it changed.
    pub fn check(&self, id: TerminalId) -> Option<ManualSshState> {
        let inspector = self.inspector.as_ref()?;
        let info = self.registry.get_info(id)?;
        if info.kind != TerminalKind::Local {
            return None;
        }
        let pid = info.process_id?;

        let mut tracked = self.lock();
        let entry = tracked.get_mut(&id)?;

        let child_count = match inspector.child_count(pid) {
            Ok(count) => count,
            Err(e) if e.is_process_gone() => {
                if entry.state.in_ssh {
                    entry.state = ManualSshState::default();
                    info!(terminal_id = id, pid, "Shell process gone, clearing manual SSH state");
                    return Some(entry.state.clone());
                }
                return None;
            }
            Err(e) => {
                debug!(terminal_id = id, pid, error = %e, "Process tree check failed");
                return None;
            }
        };

        if entry.last_child_count == Some(child_count) && !entry.state.in_ssh {
            return None;
        }
        entry.last_child_count = Some(child_count);

        let descendants = match inspector.descendants(pid) {
            Ok(list) => list,
            Err(e) => {
                debug!(terminal_id = id, pid, error = %e, "Process tree walk failed");
                return None;
            }
        };
        let ssh_process = descendants.iter().find(|p| p.name.eq_ignore_ascii_case("ssh"));

        match (ssh_process, entry.state.in_ssh) {
            (Some(process), false) => {
                let target = ssh_target_from(process);
                info!(terminal_id = id, ssh_pid = process.pid, target = %target, "Detected manual SSH session");
                entry.state = ManualSshState {
                    in_ssh: true,
                    ssh_target: Some(target),
                };
                Some(entry.state.clone())
            }
            (None, true) => {
                info!(terminal_id = id, "Manual SSH session ended");
                entry.state = ManualSshState::default();
                Some(entry.state.clone())
            }
            _ => None,
        }
    }

    /// Check every tracked terminal; returns the ones whose state changed.
    pub fn poll_all(&self) -> Vec<(TerminalId, ManualSshState)> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.tracked_ids()
            .into_iter()
            .filter_map(|id| self.check(id).map(|state| (id, state)))
            .collect()
    }
}
