//! Narrow interfaces to the collaborators the engine does not own: the
//! terminal widget, the process spawner, user settings and the highlighter.

pub mod highlight;
pub mod settings;
pub mod spawner;
pub mod surface;

pub use highlight::{HighlightRegistry, StaticHighlightRegistry, HELP_CONTEXT};
pub use settings::{MemorySettings, SettingsExt, SettingsProvider};
pub use spawner::{HighlightOptions, LocalSpawnOptions, RemoteSpawnOptions, Spawner};
pub use surface::{BufferSurface, TerminalSurface};
