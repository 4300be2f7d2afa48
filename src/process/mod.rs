pub mod inspect;
pub mod reaper;
pub mod signals;

pub use inspect::{ProcessEntry, ProcessInspector, SysinfoInspector};
pub use reaper::ProcessReaper;
pub use signals::{default_process_control, NoopProcessControl, ProcessControl};
#[cfg(unix)]
pub use signals::NixProcessControl;
