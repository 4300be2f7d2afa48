use crate::terminal::model::{TerminalId, TerminalStatus};
use crate::terminal::ssh_errors::SshErrorKind;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerAction {
    Retry,
    AutoReconnect,
    EditSession,
    FixHostKey,
}

/// Request for a non-blocking inline error banner above a terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BannerRequest {
    pub terminal_id: TerminalId,
    pub session_name: String,
    pub title: String,
    pub message: String,
    pub kind: SshErrorKind,
    /// `None` when the process never started.
    pub exit_code: Option<i32>,
    pub actions: Vec<BannerAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectOutcome {
    Connected,
    Cancelled,
    AuthFailure,
    Exhausted,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged { terminal_id: TerminalId, status: TerminalStatus },
    ManualSshChanged { terminal_id: TerminalId, target: Option<String> },
    TitleChanged { terminal_id: TerminalId, title: String },
    ErrorBanner(BannerRequest),
    BannerDismissed { terminal_id: TerminalId },
    ReconnectStatus { terminal_id: TerminalId, message: String, is_error: bool },
    ReconnectFinished { terminal_id: TerminalId, outcome: ReconnectOutcome },
    ConnectionEstablished { terminal_id: TerminalId },
    /// The child is gone for good; the container should close the tab.
    TerminalExited { terminal_id: TerminalId, exit_status: i32, name: String },
    Toast { message: String },
}

/// Typed fan-out of engine events to the presentation layer. Receivers
/// consume them on their own loop, which keeps UI writes single-threaded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            trace!(?event, "No subscribers for session event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::Toast { message: "one".into() });
        bus.emit(SessionEvent::BannerDismissed { terminal_id: 3 });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Toast { message: "one".into() });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::BannerDismissed { terminal_id: 3 });
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.emit(SessionEvent::Toast { message: "nobody listens".into() });
    }
}
