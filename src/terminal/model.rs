use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type TerminalId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    Local,
    Ssh,
    Sftp,
}

impl TerminalKind {
    pub fn is_remote(self) -> bool {
        matches!(self, TerminalKind::Ssh | TerminalKind::Sftp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminalKind::Local => "local",
            TerminalKind::Ssh => "ssh",
            TerminalKind::Sftp => "sftp",
        }
    }
}

impl fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Key,
    Password,
}

/// A remote (or saved local) session target. Treated as an immutable value
/// while a connection attempt is in flight; edits are swapped in whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub name: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub auth: AuthMode,
    pub post_login_command: Option<String>,
    /// Tri-state overrides: `None` inherits the global preference.
    pub output_highlighting: Option<bool>,
    pub cat_colorization: Option<bool>,
    pub shell_input_highlighting: Option<bool>,
    pub local_working_directory: Option<String>,
    pub local_startup_command: Option<String>,
}

impl SessionDescriptor {
    pub fn ssh(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            user: user.into(),
            port: 22,
            auth: AuthMode::Key,
            post_login_command: None,
            output_highlighting: None,
            cat_colorization: None,
            shell_input_highlighting: None,
            local_working_directory: None,
            local_startup_command: None,
        }
    }

    /// `user@host`, or just the host when no user is configured.
    pub fn target(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }

    pub fn validate_remote(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("session name is empty");
        }
        if self.host.trim().is_empty() {
            problems.push("host is empty");
        }
        if self.port == 0 {
            problems.push("port must be between 1 and 65535");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::InvalidSession(format!("{}: {}", self.name, problems.join(", "))))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalIdentifier {
    Label(String),
    Session(SessionDescriptor),
}

impl TerminalIdentifier {
    pub fn display_name(&self) -> &str {
        match self {
            TerminalIdentifier::Label(label) => label,
            TerminalIdentifier::Session(session) => &session.name,
        }
    }

    pub fn session(&self) -> Option<&SessionDescriptor> {
        match self {
            TerminalIdentifier::Session(session) => Some(session),
            TerminalIdentifier::Label(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Initializing,
    Running,
    Focused,
    Unfocused,
    Spawning,
    Connected,
    Disconnected,
    Exited,
    SpawnFailed,
}

impl TerminalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalStatus::Initializing => "initializing",
            TerminalStatus::Running => "running",
            TerminalStatus::Focused => "focused",
            TerminalStatus::Unfocused => "unfocused",
            TerminalStatus::Spawning => "spawning",
            TerminalStatus::Connected => "connected",
            TerminalStatus::Disconnected => "disconnected",
            TerminalStatus::Exited => "exited",
            TerminalStatus::SpawnFailed => "spawn_failed",
        }
    }

    /// `Exited` and `SpawnFailed` only leave through an explicit respawn.
    pub fn is_terminal(self) -> bool {
        matches!(self, TerminalStatus::Exited | TerminalStatus::SpawnFailed)
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminalStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(TerminalStatus::Initializing),
            "running" => Ok(TerminalStatus::Running),
            "focused" => Ok(TerminalStatus::Focused),
            "unfocused" => Ok(TerminalStatus::Unfocused),
            "spawning" => Ok(TerminalStatus::Spawning),
            "connected" => Ok(TerminalStatus::Connected),
            "disconnected" => Ok(TerminalStatus::Disconnected),
            "exited" => Ok(TerminalStatus::Exited),
            "spawn_failed" => Ok(TerminalStatus::SpawnFailed),
            other => Err(AppError::InvalidInputArgument(format!("Unknown terminal status: {}", other))),
        }
    }
}

/// Copy of a registry record handed out to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalInfo {
    pub id: TerminalId,
    pub kind: TerminalKind,
    pub identifier: TerminalIdentifier,
    pub process_id: Option<u32>,
    pub status: TerminalStatus,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
}

impl TerminalInfo {
    pub fn new(id: TerminalId, kind: TerminalKind, identifier: TerminalIdentifier) -> Self {
        Self {
            id,
            kind,
            identifier,
            process_id: None,
            status: TerminalStatus::Initializing,
            created_at: Utc::now(),
            connected_at: None,
            disconnected_at: None,
            last_error: None,
            reconnect_attempts: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.identifier.display_name()
    }

    pub fn session(&self) -> Option<&SessionDescriptor> {
        self.identifier.session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip_through_from_str() {
        for status in [
            TerminalStatus::Initializing,
            TerminalStatus::Focused,
            TerminalStatus::Disconnected,
            TerminalStatus::SpawnFailed,
        ] {
            assert_eq!(status.as_str().parse::<TerminalStatus>().unwrap(), status);
        }
        assert!("zombie".parse::<TerminalStatus>().is_err());
    }

    #[test]
    fn only_exit_states_are_terminal() {
        assert!(TerminalStatus::Exited.is_terminal());
        assert!(TerminalStatus::SpawnFailed.is_terminal());
        assert!(!TerminalStatus::Disconnected.is_terminal());
        assert!(!TerminalStatus::Spawning.is_terminal());
    }

    #[test]
    fn session_target_omits_empty_user() {
        let mut session = SessionDescriptor::ssh("prod", "db.example.com", "alice");
        assert_eq!(session.target(), "alice@db.example.com");
        session.user.clear();
        assert_eq!(session.target(), "db.example.com");
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut session = SessionDescriptor::ssh("", "", "root");
        session.port = 0;
        let err = session.validate_remote().unwrap_err().to_string();
        assert!(err.contains("session name is empty"));
        assert!(err.contains("host is empty"));
        assert!(err.contains("port"));
    }
}
