//! Classification of failed remote sessions from exit codes and the text
//! left on screen. Output patterns are more specific than exit codes, so
//! they are consulted first.

use crate::events::BannerAction;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SshErrorKind {
    GeneralError,
    Misuse,
    AuthFailed,
    AuthMultiFailed,
    KeyRejected,
    KeyAuthFailed,
    KeyPermissions,
    KeyFormatError,
    AuthLimit,
    AgentError,
    HostKeyFailed,
    HostKeyChanged,
    DnsError,
    ConnectionRefused,
    SshNotRunning,
    Timeout,
    NoRoute,
    NetworkUnreachable,
    RemoteClosed,
    ServerDisconnect,
    ConnectionFailed,
    SpawnFailed,
    Unknown,
}

/// Coarse buckets that decide which banner actions make sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    HostKey,
    Network,
    Other,
}

impl SshErrorKind {
    pub fn category(self) -> ErrorCategory {
        use SshErrorKind::*;
        match self {
            AuthFailed | AuthMultiFailed | KeyRejected | KeyAuthFailed | KeyPermissions | KeyFormatError | AuthLimit => {
                ErrorCategory::Authentication
            }
            HostKeyFailed | HostKeyChanged => ErrorCategory::HostKey,
            DnsError | ConnectionRefused | SshNotRunning | Timeout | NoRoute | NetworkUnreachable | RemoteClosed
            | ServerDisconnect | ConnectionFailed => ErrorCategory::Network,
            GeneralError | Misuse | AgentError | SpawnFailed | Unknown => ErrorCategory::Other,
        }
    }

    pub fn banner_actions(self) -> Vec<BannerAction> {
        match self.category() {
            // Retrying with the same credentials cannot succeed.
            ErrorCategory::Authentication => vec![BannerAction::EditSession],
            ErrorCategory::HostKey => vec![BannerAction::FixHostKey],
            ErrorCategory::Network => vec![BannerAction::Retry, BannerAction::AutoReconnect],
            ErrorCategory::Other => vec![BannerAction::Retry, BannerAction::EditSession],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshErrorInfo {
    pub kind: SshErrorKind,
    pub title: &'static str,
    pub description: String,
}

// Ordered: longer, more specific phrases before the generic ones they contain.
const OUTPUT_PATTERNS: &[(&str, SshErrorKind, &str, &str)] = &[
    ("permission denied (publickey)", SshErrorKind::KeyRejected, "SSH Key Rejected", "The server rejected your SSH key. The key may not be authorized on the server."),
    ("publickey,password", SshErrorKind::AuthMultiFailed, "Multiple Auth Methods Failed", "Both public key and password authentication failed. Check your credentials."),
    ("too many authentication failures", SshErrorKind::AuthLimit, "Too Many Authentication Failures", "Too many failed login attempts. Wait before trying again."),
    ("invalid/incorrect password", SshErrorKind::AuthFailed, "Authentication Failed", "The password is invalid or incorrect."),
    ("incorrect password", SshErrorKind::AuthFailed, "Authentication Failed", "The password entered is incorrect."),
    ("permission denied", SshErrorKind::AuthFailed, "Authentication Failed", "Username or password is incorrect. Please verify your credentials."),
    ("authentication failed", SshErrorKind::AuthFailed, "Authentication Failed", "Authentication failed. Check your username and password."),
    ("agent refused operation", SshErrorKind::AgentError, "SSH Agent Error", "SSH agent refused the operation. Check if your key is loaded with ssh-add."),
    ("could not open a connection to your authentication agent", SshErrorKind::AgentError, "SSH Agent Not Running", "SSH agent is not running. Start it and add your key."),
    ("host key verification failed", SshErrorKind::HostKeyFailed, "Host Key Verification Failed", "The server's host key has changed or is not trusted. This could indicate a security issue."),
    ("remote host identification has changed", SshErrorKind::HostKeyChanged, "Host Key Changed", "The server's identification has changed. This could indicate a security issue or server reinstall."),
    ("host key changed", SshErrorKind::HostKeyChanged, "Host Key Changed", "The server's host key has changed. Remove the old key from known_hosts if this is expected."),
    ("offending key", SshErrorKind::HostKeyChanged, "Host Key Changed", "The server's host key has changed. Remove the old key from known_hosts if this is expected."),
    ("could not resolve hostname", SshErrorKind::DnsError, "DNS Resolution Failed", "Could not resolve the hostname. Check if the address is correct."),
    ("name or service not known", SshErrorKind::DnsError, "DNS Resolution Failed", "The hostname could not be resolved. Check the server address."),
    ("no address associated", SshErrorKind::DnsError, "DNS Resolution Failed", "No address found for the hostname."),
    ("temporary failure in name resolution", SshErrorKind::DnsError, "DNS Temporary Failure", "DNS resolution temporarily failed. Check your network connection."),
    ("port 22: connection refused", SshErrorKind::SshNotRunning, "SSH Service Not Running", "SSH service doesn't appear to be running on the server."),
    ("connection refused", SshErrorKind::ConnectionRefused, "Connection Refused", "The server refused the connection. Check if SSH is running on the server."),
    ("connection timed out", SshErrorKind::Timeout, "Connection Timeout", "Connection attempt timed out. The server may be unreachable or behind a firewall."),
    ("operation timed out", SshErrorKind::Timeout, "Connection Timeout", "The operation timed out. Server may be slow or unreachable."),
    ("no route to host", SshErrorKind::NoRoute, "No Route to Host", "Network path to the server could not be found. Check your network connection."),
    ("network is unreachable", SshErrorKind::NetworkUnreachable, "Network Unreachable", "The network is not reachable. Check your internet connection."),
    ("network unreachable", SshErrorKind::NetworkUnreachable, "Network Unreachable", "The network is not reachable. Check your internet connection."),
    ("connection reset by peer", SshErrorKind::RemoteClosed, "Connection Reset", "The connection was reset by the remote server."),
    ("connection closed by remote host", SshErrorKind::RemoteClosed, "Connection Closed", "The remote server closed the connection unexpectedly."),
    ("broken pipe", SshErrorKind::RemoteClosed, "Connection Lost", "The connection to the server was lost."),
    ("connection closed by", SshErrorKind::RemoteClosed, "Connection Closed", "The server closed the connection."),
    ("read from socket failed", SshErrorKind::RemoteClosed, "Connection Lost", "Failed to read from the connection. The server may have closed it."),
    ("received disconnect from", SshErrorKind::ServerDisconnect, "Server Disconnected", "The server disconnected. Check server logs for details."),
    ("no such identity", SshErrorKind::KeyAuthFailed, "Key Authentication Failed", "The specified SSH key file was not found."),
    ("key_load_public: invalid format", SshErrorKind::KeyFormatError, "SSH Key Format Error", "The SSH key file has an invalid format."),
    ("invalid key", SshErrorKind::KeyAuthFailed, "Key Authentication Failed", "The SSH key is invalid or corrupted."),
    ("load key", SshErrorKind::KeyAuthFailed, "Key Authentication Failed", "Failed to load the SSH key file."),
    ("bad permissions", SshErrorKind::KeyPermissions, "Key File Permissions Error", "SSH key file has incorrect permissions. Use chmod 600 on the key file."),
];

/// Patterns that stop auto-reconnect immediately.
const AUTH_PATTERNS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "incorrect password",
    "invalid password",
    "too many authentication failures",
];

/// Exit codes ssh uses for authentication failures.
const AUTH_EXIT_CODES: &[i32] = &[5, 6];

fn from_exit_code(exit_code: i32) -> Option<SshErrorInfo> {
    let (kind, title, description) = match exit_code {
        1 => (SshErrorKind::GeneralError, "General SSH Error", "The SSH command failed with a general error."),
        2 => (SshErrorKind::Misuse, "Command Misuse", "SSH command was used incorrectly."),
        5 => (SshErrorKind::AuthFailed, "Authentication Failed", "Username or password is incorrect, or the user is not allowed to connect."),
        6 => (SshErrorKind::AuthFailed, "Authentication Failed", "Authentication failed. Check username, password, or SSH key."),
        65 => (SshErrorKind::HostKeyFailed, "Host Key Verification Failed", "The server's host key is not recognized or has changed."),
        255 => (SshErrorKind::ConnectionFailed, "Connection Failed", "Could not establish connection to the server. Check if the host is reachable and the port is correct."),
        _ => return None,
    };
    Some(SshErrorInfo { kind, title, description: description.to_string() })
}

pub fn classify(exit_code: i32, terminal_text: Option<&str>) -> SshErrorInfo {
    if let Some(text) = terminal_text {
        let lower = text.to_lowercase();
        if let Some(&(_, kind, title, description)) = OUTPUT_PATTERNS.iter().find(|(pattern, ..)| lower.contains(*pattern)) {
            return SshErrorInfo { kind, title, description: description.to_string() };
        }
    }
    from_exit_code(exit_code).unwrap_or_else(|| SshErrorInfo {
        kind: SshErrorKind::Unknown,
        title: "SSH Connection Error",
        description: format!("An unexpected error occurred while connecting. Exit code: {}", exit_code),
    })
}

/// The remote process could not be started at all.
pub fn spawn_failure(error: &str) -> SshErrorInfo {
    SshErrorInfo {
        kind: SshErrorKind::SpawnFailed,
        title: "Failed to Start Session",
        description: format!("The connection process could not be started: {}", error),
    }
}

pub fn is_auth_error(exit_code: i32, terminal_text: Option<&str>) -> bool {
    if AUTH_EXIT_CODES.contains(&exit_code) {
        return true;
    }
    terminal_text
        .map(|text| {
            let lower = text.to_lowercase();
            AUTH_PATTERNS.iter().any(|pattern| lower.contains(pattern))
        })
        .unwrap_or(false)
}

/// Turn a raw wait status into an exit code: the exit status when the
/// child exited, `128 + signal` when it was killed.
#[cfg(unix)]
pub fn decode_wait_status(raw: i32) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    let status = std::process::ExitStatus::from_raw(raw);
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => raw,
    }
}

#[cfg(not(unix))]
pub fn decode_wait_status(raw: i32) -> i32 {
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_text_wins_over_exit_code() {
        let info = classify(255, Some("ssh: connect to host x port 22: Connection refused"));
        assert_eq!(info.kind, SshErrorKind::SshNotRunning);
        let info = classify(255, Some("ssh: connect to host x port 2222: Connection refused"));
        assert_eq!(info.kind, SshErrorKind::ConnectionRefused);
    }

    #[test]
    fn specific_key_rejection_beats_generic_permission_denied() {
        let info = classify(255, Some("user@host: Permission denied (publickey)."));
        assert_eq!(info.kind, SshErrorKind::KeyRejected);
        assert_eq!(info.kind.category(), ErrorCategory::Authentication);
    }

    #[test]
    fn exit_codes_are_the_fallback() {
        assert_eq!(classify(65, None).kind, SshErrorKind::HostKeyFailed);
        assert_eq!(classify(255, Some("nothing useful")).kind, SshErrorKind::ConnectionFailed);
        let unknown = classify(42, None);
        assert_eq!(unknown.kind, SshErrorKind::Unknown);
        assert!(unknown.description.contains("42"));
    }

    #[test]
    fn actions_follow_the_category() {
        assert_eq!(SshErrorKind::AuthFailed.banner_actions(), vec![BannerAction::EditSession]);
        assert_eq!(SshErrorKind::HostKeyChanged.banner_actions(), vec![BannerAction::FixHostKey]);
        assert_eq!(
            SshErrorKind::Timeout.banner_actions(),
            vec![BannerAction::Retry, BannerAction::AutoReconnect]
        );
    }

    #[test]
    fn auth_errors_from_codes_or_text() {
        assert!(is_auth_error(5, None));
        assert!(is_auth_error(255, Some("Too many authentication failures")));
        assert!(!is_auth_error(255, Some("Connection timed out")));
        assert!(!is_auth_error(1, None));
    }

    #[test]
    fn spawn_failures_offer_retry() {
        let info = spawn_failure("ssh: not found");
        assert_eq!(info.kind, SshErrorKind::SpawnFailed);
        assert!(info.description.contains("ssh: not found"));
        assert!(info.kind.banner_actions().contains(&BannerAction::Retry));
    }

    #[cfg(unix)]
    #[test]
    fn wait_status_decoding() {
        assert_eq!(decode_wait_status(0), 0);
        assert_eq!(decode_wait_status(255 << 8), 255);
        assert_eq!(decode_wait_status(9), 137);
    }
}
