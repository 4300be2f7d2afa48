pub mod clock;
pub mod event_logger;
pub mod path_utils;

pub use clock::{Clock, SystemClock, TokioClock};
pub use event_logger::TerminalEventLogger;
