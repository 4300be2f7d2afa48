use crate::terminal::model::TerminalStatus;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub connected: usize,
    pub disconnected: usize,
    /// Spawned or spawning, connection not confirmed yet.
    pub connecting: usize,
    /// An auto-reconnect run is active, whatever the record says.
    pub reconnecting: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    NoTerminals,
    AllConnected,
    AllDisconnected,
    Partial,
    Connecting,
    Unknown,
}

/// Connection summary over every terminal of one named session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConnectionStatus {
    pub total_terminals: usize,
    pub status_counts: StatusCounts,
    pub overall_status: OverallStatus,
}

impl SessionConnectionStatus {
    /// Builds the summary from `(status, reconnect_active)` pairs.
    pub fn from_terminals<I>(terminals: I) -> Self
    where
        I: IntoIterator<Item = (TerminalStatus, bool)>,
    {
        let mut counts = StatusCounts::default();
        let mut total = 0;
        for (status, reconnecting) in terminals {
            total += 1;
            let bucket = if reconnecting {
                &mut counts.reconnecting
            } else {
                match status {
                    TerminalStatus::Connected => &mut counts.connected,
                    TerminalStatus::Disconnected => &mut counts.disconnected,
                    TerminalStatus::Initializing | TerminalStatus::Spawning | TerminalStatus::Running => {
                        &mut counts.connecting
                    }
                    _ => &mut counts.other,
                }
            };
            *bucket += 1;
        }

        let overall_status = if total == 0 {
            OverallStatus::NoTerminals
        } else if counts.connected == total {
            OverallStatus::AllConnected
        } else if counts.disconnected == total {
            OverallStatus::AllDisconnected
        } else if counts.connected > 0 {
            OverallStatus::Partial
        } else if counts.connecting > 0 || counts.reconnecting > 0 {
            OverallStatus::Connecting
        } else {
            OverallStatus::Unknown
        };

        Self {
            total_terminals: total,
            status_counts: counts,
            overall_status,
        }
    }
}
