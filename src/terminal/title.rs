use crate::terminal::model::{TerminalInfo, TerminalKind};
use serde::Serialize;
use url::Url;

/// Working directory reported by the shell through OSC 7.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryInfo {
    pub hostname: String,
    pub path: String,
    pub display_path: String,
}

/// The user's home directory, if `~` expands to something.
pub fn home_dir() -> Option<String> {
    let expanded = shellexpand::tilde("~");
    (expanded != "~").then(|| expanded.into_owned())
}

/// `path` with the home directory shown as `~`.
pub fn display_path(path: &str, home: Option<&str>) -> String {
    let Some(home) = home.map(|h| h.trim_end_matches('/')).filter(|h| !h.is_empty()) else {
        return path.to_string();
    };
    if path == home {
        return "~".to_string();
    }
    match path.strip_prefix(home) {
        Some(rest) if rest.starts_with('/') => format!("~{}", rest),
        _ => path.to_string(),
    }
}

/// Parse a `file://host/path` URI. Anything else is ignored.
pub fn parse_directory_uri(uri: &str, home: Option<&str>) -> Option<DirectoryInfo> {
    let parsed = Url::parse(uri).ok()?;
    if parsed.scheme() != "file" {
        return None;
    }
    let path = String::from_utf8_lossy(&urlencoding::decode_binary(parsed.path().as_bytes())).into_owned();
    let hostname = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost")
        .to_string();
    Some(DirectoryInfo {
        display_path: display_path(&path, home),
        hostname,
        path,
    })
}

pub fn sftp_title(session_name: &str) -> String {
    format!("SFTP-{}", session_name)
}

/// Tab title for a terminal.
///
/// Remote shells show `session:dir`. A local shell running a manual `ssh`
/// shows `target:dir`; otherwise the directory, falling back to its label.
pub fn compute_title(info: &TerminalInfo, manual_ssh_target: Option<&str>, directory: Option<&DirectoryInfo>) -> String {
    let with_dir = |base: &str| match directory {
        Some(dir) => format!("{}:{}", base, dir.display_path),
        None => base.to_string(),
    };
    match info.kind {
        TerminalKind::Ssh => with_dir(info.name()),
        TerminalKind::Sftp => sftp_title(info.name()),
        TerminalKind::Local => match (manual_ssh_target, directory) {
            (Some(target), _) => with_dir(target),
            (None, Some(dir)) => dir.display_path.clone(),
            (None, None) => info.name().to_string(),
        },
    }
}
