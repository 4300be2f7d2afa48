//! Lifecycle, connection monitoring and recovery for the sessions of a
//! terminal emulator. The host application supplies the terminal surfaces,
//! the process spawner and its settings store; this crate decides what
//! happens to every terminal from spawn to teardown.

pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod ports;
pub mod process;
pub mod reconnect;
pub mod terminal;
pub mod tracking;
pub mod utils;

pub use config::Config;
pub use error::AppError;
pub use events::{BannerAction, BannerRequest, EventBus, ReconnectOutcome, SessionEvent};
pub use reconnect::{ReconnectPlan, ReconnectState};
pub use terminal::{Collaborators, CreateLocalParams, TerminalManager};
