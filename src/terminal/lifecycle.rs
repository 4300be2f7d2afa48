use crate::terminal::model::{TerminalId, TerminalStatus};
use crate::terminal::registry::TerminalRegistry;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Guards status transitions and de-duplicates exit processing.
///
/// Child-exit notifications can arrive twice, or after the surface is gone.
/// An id enters the closing set atomically; whoever fails to enter drops
/// the event.
#[derive(Debug)]
pub struct LifecycleManager {
    registry: Arc<TerminalRegistry>,
    closing: Mutex<HashSet<TerminalId>>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<TerminalRegistry>) -> Self {
        Self {
            registry,
            closing: Mutex::new(HashSet::new()),
        }
    }

    fn closing(&self) -> MutexGuard<'_, HashSet<TerminalId>> {
        self.closing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mark_closing(&self, id: TerminalId) -> bool {
        let inserted = self.closing().insert(id);
        if !inserted {
            debug!(terminal_id = id, "Duplicate exit event dropped");
        }
        inserted
    }

    pub fn unmark_closing(&self, id: TerminalId) {
        self.closing().remove(&id);
    }

    pub fn is_closing(&self, id: TerminalId) -> bool {
        self.closing().contains(&id)
    }

    pub fn closing_count(&self) -> usize {
        self.closing().len()
    }

    /// Apply `new_state` to the record. Rejected when the record is gone,
    /// when an `Exited` record would be exited again, or when a finished
    /// record would be made live.
    pub fn transition(&self, id: TerminalId, new_state: TerminalStatus) -> bool {
        // Held across the read-modify-write so two callers cannot both see
        // a non-exited status.
        let _guard = self.closing();
        let Some(info) = self.registry.get_info(id) else {
            return false;
        };
        if new_state == TerminalStatus::Exited && info.status == TerminalStatus::Exited {
            return false;
        }
        let applied = self.registry.update_status(id, new_state);
        if applied {
            debug!(terminal_id = id, from = %info.status, to = %new_state, "Terminal state transition");
        }
        applied
    }
}
