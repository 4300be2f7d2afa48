use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub connection_check_interval: Duration,
    pub connection_max_checks: u32,
    pub connection_tail_lines: usize,
    /// When the check budget runs out without a decisive screen read, treat
    /// a still-running remote process as connected.
    pub assume_connected_on_timeout: bool,
    pub manual_ssh_poll_interval: Duration,
    pub reaper_grace_period: Duration,
    pub reconnect_first_delay: Duration,
    pub timeout_restore_delay: Duration,
    pub execute_command_delay: Duration,
    pub default_connect_timeout_secs: u64,
    pub reconnect_duration_minutes: u64,
    pub reconnect_interval_secs: u64,
    pub reconnect_timeout_secs: u64,
    pub event_log_file: Option<PathBuf>,
    pub event_log_max_size_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            connection_check_interval: Duration::from_millis(1000),
            connection_max_checks: 10,
            connection_tail_lines: 5,
            assume_connected_on_timeout: true,
            manual_ssh_poll_interval: Duration::from_millis(1000),
            reaper_grace_period: Duration::from_millis(5000),
            reconnect_first_delay: Duration::from_millis(500),
            timeout_restore_delay: Duration::from_millis(1000),
            execute_command_delay: Duration::from_millis(500),
            default_connect_timeout_secs: 30,
            reconnect_duration_minutes: 5,
            reconnect_interval_secs: 10,
            reconnect_timeout_secs: 10,
            event_log_file: None,
            event_log_max_size_bytes: 10 * 1024 * 1024,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        _ => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_millis() as u64).map(Duration::from_millis)
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        let defaults = Config::default();

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| defaults.log_level.clone());

        let connection_max_checks = env_or("CONNECTION_MAX_CHECKS", defaults.connection_max_checks)?;
        if connection_max_checks == 0 {
            anyhow::bail!("CONNECTION_MAX_CHECKS must be at least 1");
        }

        let reconnect_interval_secs = env_or("RECONNECT_INTERVAL_SECS", defaults.reconnect_interval_secs)?;
        if reconnect_interval_secs == 0 {
            anyhow::bail!("RECONNECT_INTERVAL_SECS must be at least 1");
        }

        let event_log_file = std::env::var("EVENT_LOG_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| PathBuf::from(shellexpand::tilde(s.trim()).as_ref()));

        let event_log_max_size_bytes = env_or("EVENT_LOG_MAX_SIZE_MB", 10u64)
            .map(|mb| mb * 1024 * 1024) // Convert MB to Bytes
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default event log size");
                defaults.event_log_max_size_bytes
            });

        Ok(Config {
            log_level,
            connection_check_interval: env_millis("CONNECTION_CHECK_INTERVAL_MS", defaults.connection_check_interval)?,
            connection_max_checks,
            connection_tail_lines: env_or("CONNECTION_TAIL_LINES", defaults.connection_tail_lines)?,
            assume_connected_on_timeout: env_or("ASSUME_CONNECTED_ON_TIMEOUT", defaults.assume_connected_on_timeout)?,
            manual_ssh_poll_interval: env_millis("MANUAL_SSH_POLL_MS", defaults.manual_ssh_poll_interval)?,
            reaper_grace_period: env_millis("REAPER_GRACE_MS", defaults.reaper_grace_period)?,
            reconnect_first_delay: env_millis("RECONNECT_FIRST_DELAY_MS", defaults.reconnect_first_delay)?,
            timeout_restore_delay: env_millis("TIMEOUT_RESTORE_DELAY_MS", defaults.timeout_restore_delay)?,
            execute_command_delay: env_millis("EXECUTE_COMMAND_DELAY_MS", defaults.execute_command_delay)?,
            default_connect_timeout_secs: env_or("SSH_CONNECT_TIMEOUT", defaults.default_connect_timeout_secs)?,
            reconnect_duration_minutes: env_or("RECONNECT_DURATION_MINUTES", defaults.reconnect_duration_minutes)?,
            reconnect_interval_secs,
            reconnect_timeout_secs: env_or("RECONNECT_TIMEOUT_SECS", defaults.reconnect_timeout_secs)?,
            event_log_file,
            event_log_max_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.connection_max_checks, 10);
        assert_eq!(config.connection_tail_lines, 5);
        assert_eq!(config.reaper_grace_period, Duration::from_secs(5));
        assert_eq!(config.reconnect_first_delay, Duration::from_millis(500));
        assert!(config.assume_connected_on_timeout);
        assert!(config.event_log_file.is_none());
    }

    #[test]
    fn env_or_rejects_garbage() {
        std::env::set_var("TSE_TEST_GARBAGE_NUMBER", "ten");
        let parsed: Result<u32> = env_or("TSE_TEST_GARBAGE_NUMBER", 3);
        assert!(parsed.is_err());
        std::env::remove_var("TSE_TEST_GARBAGE_NUMBER");
    }

    #[test]
    fn env_or_uses_default_when_unset() {
        let parsed: u32 = env_or("TSE_TEST_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(parsed, 7);
    }
}
