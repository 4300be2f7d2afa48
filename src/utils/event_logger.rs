use crate::config::Config;
use crate::terminal::model::TerminalId;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::error;

/// Append-only log of terminal lifecycle events (`created`, `exited`,
/// `removed`, ...), one line per event, rotated by size.
#[derive(Debug, Clone)]
pub struct TerminalEventLogger {
    log_file_path: PathBuf,
    max_size_bytes: u64,
}

impl TerminalEventLogger {
    pub fn new(log_file_path: PathBuf, max_size_bytes: u64) -> Self {
        // Ensure log directory exists
        if let Some(parent_dir) = log_file_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                if let Err(e) = std::fs::create_dir_all(parent_dir) {
                    error!(path = %parent_dir.display(), error = %e, "Failed to create event log directory");
                }
            }
        }
        Self {
            log_file_path,
            max_size_bytes: max_size_bytes.max(1),
        }
    }

    /// `None` when no log file is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .event_log_file
            .clone()
            .map(|path| Self::new(path, config.event_log_max_size_bytes))
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_file_path
    }

    async fn rotate_log_if_needed(&self) -> Result<()> {
        if !self.log_file_path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.log_file_path).await?;
        if metadata.len() >= self.max_size_bytes {
            let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
            let file_stem = self
                .log_file_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy();
            let backup_file_name = match self.log_file_path.extension() {
                Some(extension) => format!("{}_{}.{}", file_stem, timestamp, extension.to_string_lossy()),
                None => format!("{}_{}", file_stem, timestamp),
            };
            let backup_path = self.log_file_path.with_file_name(backup_file_name);

            fs::rename(&self.log_file_path, backup_path).await?;
        }
        Ok(())
    }

    pub async fn log_event(&self, terminal_id: TerminalId, event: &str, details: &Value) {
        if let Err(e) = self.try_log_event(terminal_id, event, details).await {
            error!(terminal_id, event, error = %e, "Failed to write terminal event log");
        }
    }

    async fn try_log_event(&self, terminal_id: TerminalId, event: &str, details: &Value) -> Result<()> {
        self.rotate_log_if_needed().await?;

        let timestamp = Utc::now().to_rfc3339();
        let details_string = serde_json::to_string(details)?;
        let log_entry = format!("{} | {:<8} | terminal={} | {}\n", timestamp, event, terminal_id, details_string);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .await?;

        file.write_all(log_entry.as_bytes()).await?;
        Ok(())
    }
}
