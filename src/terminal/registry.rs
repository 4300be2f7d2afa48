use crate::ports::surface::TerminalSurface;
use crate::terminal::model::{TerminalId, TerminalIdentifier, TerminalInfo, TerminalKind, TerminalStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info};

#[derive(Default)]
struct RegistryInner {
    next_id: TerminalId,
    terminals: HashMap<TerminalId, TerminalInfo>,
    surfaces: HashMap<TerminalId, Weak<dyn TerminalSurface>>,
}

/// Authoritative `id -> record` arena. The container owns each surface; the
/// registry only keeps a weak handle and drops it when told the surface
/// was destroyed. Readers always get copies.
pub struct TerminalRegistry {
    inner: Mutex<RegistryInner>,
}

impl std::fmt::Debug for TerminalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TerminalRegistry")
            .field("next_id", &inner.next_id)
            .field("terminals", &inner.terminals.len())
            .finish()
    }
}

impl Default for TerminalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, surface: &Arc<dyn TerminalSurface>, kind: TerminalKind, identifier: TerminalIdentifier) -> TerminalId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.terminals.insert(id, TerminalInfo::new(id, kind, identifier));
        inner.surfaces.insert(id, Arc::downgrade(surface));
        debug!(terminal_id = id, kind = %kind, "Registered terminal");
        id
    }

    /// Re-insert a record that was moved over from another window, keeping
    /// its id.
    pub fn reregister(&self, surface: &Arc<dyn TerminalSurface>, info: TerminalInfo) {
        let mut inner = self.lock();
        let id = info.id;
        inner.next_id = inner.next_id.max(id + 1);
        inner.terminals.insert(id, info);
        inner.surfaces.insert(id, Arc::downgrade(surface));
        info!(terminal_id = id, "Re-registered terminal in new window");
    }

    /// Remove a record for a window move, without any cleanup.
    pub fn deregister_for_move(&self, id: TerminalId) -> Option<TerminalInfo> {
        let mut inner = self.lock();
        inner.surfaces.remove(&id);
        let info = inner.terminals.remove(&id);
        if info.is_some() {
            info!(terminal_id = id, "De-registered terminal for move");
        }
        info
    }

    /// Set a status. Refuses to move a record out of `Exited`/`SpawnFailed`
    /// into a live state; that only happens through [`begin_respawn`].
    ///
    /// [`begin_respawn`]: TerminalRegistry::begin_respawn
    pub fn update_status(&self, id: TerminalId, status: TerminalStatus) -> bool {
        let mut inner = self.lock();
        match inner.terminals.get_mut(&id) {
            Some(info) => {
                if info.status.is_terminal() && !status.is_terminal() {
                    debug!(terminal_id = id, from = %info.status, to = %status, "Refusing to revive a finished terminal");
                    return false;
                }
                info.status = status;
                true
            }
            None => false,
        }
    }

    /// Record the spawned child's pid; a live record becomes `Running`.
    pub fn update_process(&self, id: TerminalId, pid: u32) {
        let mut inner = self.lock();
        if let Some(info) = inner.terminals.get_mut(&id) {
            info.process_id = Some(pid);
            if !info.status.is_terminal() {
                info.status = TerminalStatus::Running;
            }
        }
    }

    /// The explicit respawn entry point: the only way a finished record
    /// becomes live again. Returns false if the id is unknown.
    pub fn begin_respawn(&self, id: TerminalId) -> bool {
        let mut inner = self.lock();
        match inner.terminals.get_mut(&id) {
            Some(info) => {
                info.status = TerminalStatus::Spawning;
                info.process_id = None;
                true
            }
            None => false,
        }
    }

    pub fn update_connection_status(&self, id: TerminalId, connected: bool, error_message: Option<&str>) {
        let mut inner = self.lock();
        if let Some(info) = inner.terminals.get_mut(&id) {
            if connected {
                if info.status.is_terminal() {
                    debug!(terminal_id = id, status = %info.status, "Ignoring connect for a finished terminal");
                    return;
                }
                info.status = TerminalStatus::Connected;
                info.connected_at = Some(Utc::now());
                info.last_error = None;
                info.reconnect_attempts = 0;
            } else {
                if !info.status.is_terminal() {
                    info.status = TerminalStatus::Disconnected;
                }
                info.disconnected_at = Some(Utc::now());
                if let Some(message) = error_message {
                    info.last_error = Some(message.to_string());
                }
            }
        }
    }

    pub fn increment_reconnect_attempts(&self, id: TerminalId) -> u32 {
        let mut inner = self.lock();
        match inner.terminals.get_mut(&id) {
            Some(info) => {
                info.reconnect_attempts += 1;
                info.reconnect_attempts
            }
            None => 0,
        }
    }

    pub fn get_info(&self, id: TerminalId) -> Option<TerminalInfo> {
        self.lock().terminals.get(&id).cloned()
    }

    pub fn surface(&self, id: TerminalId) -> Option<Arc<dyn TerminalSurface>> {
        self.lock().surfaces.get(&id).and_then(Weak::upgrade)
    }

    pub fn unregister(&self, id: TerminalId) -> bool {
        let mut inner = self.lock();
        inner.surfaces.remove(&id);
        inner.terminals.remove(&id).is_some()
    }

    /// Drop the surface handle once the container destroyed the widget.
    pub fn surface_destroyed(&self, id: TerminalId) {
        if self.lock().surfaces.remove(&id).is_some() {
            debug!(terminal_id = id, "Surface handle released");
        }
    }

    pub fn all_ids(&self) -> Vec<TerminalId> {
        let mut ids: Vec<_> = self.lock().terminals.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn ids_where(&self, predicate: impl Fn(&TerminalInfo) -> bool) -> Vec<TerminalId> {
        let mut ids: Vec<_> = self
            .lock()
            .terminals
            .values()
            .filter(|info| predicate(info))
            .map(|info| info.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn terminals_for_session(&self, session_name: &str) -> Vec<TerminalId> {
        self.ids_where(|info| info.session().is_some_and(|s| s.name == session_name))
    }

    pub fn terminals_by_status(&self, status: TerminalStatus) -> Vec<TerminalId> {
        self.ids_where(|info| info.status == status)
    }

    pub fn terminals_by_kind(&self, kind: TerminalKind) -> Vec<TerminalId> {
        self.ids_where(|info| info.kind == kind)
    }

    pub fn session_terminal_count(&self, session_name: &str) -> usize {
        self.terminals_for_session(session_name).len()
    }

    /// Remote terminals grouped by session name.
    pub fn active_remote_sessions(&self) -> HashMap<String, Vec<TerminalId>> {
        let inner = self.lock();
        let mut sessions: HashMap<String, Vec<TerminalId>> = HashMap::new();
        for info in inner.terminals.values().filter(|info| info.kind.is_remote()) {
            if let Some(session) = info.session() {
                sessions.entry(session.name.clone()).or_default().push(info.id);
            }
        }
        for ids in sessions.values_mut() {
            ids.sort_unstable();
        }
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .terminals
            .values()
            .filter(|info| !info.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
