pub mod lifecycle;
pub mod manager;
pub mod model;
pub mod registry;
pub mod ssh_errors;
pub mod status;
pub mod title;

pub use lifecycle::LifecycleManager;
pub use manager::{Collaborators, CreateLocalParams, ManagerStats, TerminalManager};
pub use model::{AuthMode, SessionDescriptor, TerminalId, TerminalIdentifier, TerminalInfo, TerminalKind, TerminalStatus};
pub use registry::TerminalRegistry;
pub use ssh_errors::{SshErrorInfo, SshErrorKind};
pub use status::{OverallStatus, SessionConnectionStatus, StatusCounts};
