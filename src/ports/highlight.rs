use crate::terminal::model::TerminalId;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Context key used for `--help`, `-h`, `help` and `man` output.
pub const HELP_CONTEXT: &str = "help";

pub trait HighlightRegistry: Send + Sync {
    fn enabled_for_local(&self) -> bool;
    fn enabled_for_ssh(&self) -> bool;
    /// Lowercase program names that have dedicated rule sets.
    fn all_known_triggers(&self) -> HashSet<String>;
    fn set_context(&self, program: &str, session_id: TerminalId, full_command: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSelection {
    pub program: String,
    pub full_command: String,
}

/// Fixed trigger set that remembers the last context per terminal.
#[derive(Debug, Default)]
pub struct StaticHighlightRegistry {
    local_enabled: bool,
    ssh_enabled: bool,
    triggers: HashSet<String>,
    contexts: RwLock<HashMap<TerminalId, ContextSelection>>,
}

impl StaticHighlightRegistry {
    pub fn new<I, S>(triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            local_enabled: true,
            ssh_enabled: true,
            triggers: triggers.into_iter().map(|t| t.as_ref().to_lowercase()).collect(),
            contexts: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_enabled(mut self, local: bool, ssh: bool) -> Self {
        self.local_enabled = local;
        self.ssh_enabled = ssh;
        self
    }

    pub fn context_for(&self, session_id: TerminalId) -> Option<ContextSelection> {
        self.contexts.read().ok().and_then(|c| c.get(&session_id).cloned())
    }
}

impl HighlightRegistry for StaticHighlightRegistry {
    fn enabled_for_local(&self) -> bool {
        self.local_enabled
    }

    fn enabled_for_ssh(&self) -> bool {
        self.ssh_enabled
    }

    fn all_known_triggers(&self) -> HashSet<String> {
        self.triggers.clone()
    }

    fn set_context(&self, program: &str, session_id: TerminalId, full_command: &str) {
        if let Ok(mut contexts) = self.contexts.write() {
            contexts.insert(
                session_id,
                ContextSelection {
                    program: program.to_string(),
                    full_command: full_command.to_string(),
                },
            );
        }
    }
}
