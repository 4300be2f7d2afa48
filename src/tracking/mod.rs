pub mod connection_monitor;
pub mod ssh_tracker;

pub use connection_monitor::{classify_tail, ConnectionMonitor, MonitorDecision, MonitorSettings, TailVerdict};
pub use ssh_tracker::{ManualSshState, ManualSshTracker};
