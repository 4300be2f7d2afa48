use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

pub const CONNECT_TIMEOUT_KEY: &str = "ssh_connect_timeout";
pub const IGNORED_COMMANDS_KEY: &str = "ignored_highlight_commands";
pub const CAT_COLORIZATION_KEY: &str = "cat_colorization_enabled";
pub const SHELL_INPUT_HIGHLIGHTING_KEY: &str = "shell_input_highlighting_enabled";

/// Key/value user settings owned by the host application.
pub trait SettingsProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// `persist == false` keeps the change in memory only.
    fn set(&self, key: &str, value: Value, persist: bool);
}

/// Typed accessors with defaults on top of any provider.
pub trait SettingsExt {
    fn get_u64(&self, key: &str, default: u64) -> u64;
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_string_set(&self, key: &str) -> HashSet<String>;
}

impl<T: SettingsProvider + ?Sized> SettingsExt for T {
    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_string_set(&self, key: &str) -> HashSet<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
    persisted: RwLock<HashSet<String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        let settings = Self::new();
        for (key, value) in values {
            settings.set(&key, value, true);
        }
        settings
    }

    pub fn is_persisted(&self, key: &str) -> bool {
        self.persisted
            .read()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }
}

impl SettingsProvider for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok().and_then(|values| values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value, persist: bool) {
        debug!(key = %key, value = %value, persist, "Setting updated");
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value);
        }
        if let Ok(mut persisted) = self.persisted.write() {
            if persist {
                persisted.insert(key.to_string());
            } else {
                persisted.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_getters_fall_back_on_missing_or_wrong_type() {
        let settings = MemorySettings::new();
        settings.set(CONNECT_TIMEOUT_KEY, json!("thirty"), false);
        assert_eq!(settings.get_u64(CONNECT_TIMEOUT_KEY, 30), 30);
        settings.set(CONNECT_TIMEOUT_KEY, json!(45), false);
        assert_eq!(settings.get_u64(CONNECT_TIMEOUT_KEY, 30), 45);
        assert!(settings.get_bool(CAT_COLORIZATION_KEY, true));
    }

    #[test]
    fn string_sets_are_normalized() {
        let settings = MemorySettings::with_values([(IGNORED_COMMANDS_KEY.to_string(), json!(["Vim", " htop ", "", 3]))]);
        let ignored = settings.get_string_set(IGNORED_COMMANDS_KEY);
        assert_eq!(ignored.len(), 2);
        assert!(ignored.contains("vim"));
        assert!(ignored.contains("htop"));
    }

    #[test]
    fn transient_set_clears_persist_flag() {
        let settings = MemorySettings::with_values([(CONNECT_TIMEOUT_KEY.to_string(), json!(30))]);
        assert!(settings.is_persisted(CONNECT_TIMEOUT_KEY));
        settings.set(CONNECT_TIMEOUT_KEY, json!(5), false);
        assert!(!settings.is_persisted(CONNECT_TIMEOUT_KEY));
    }
}
