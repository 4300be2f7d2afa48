pub mod command_detector;
pub mod patterns;

pub use command_detector::{detect, CommandDetector, DetectedCommand, SubmitKey, SubmitKeyCode};
