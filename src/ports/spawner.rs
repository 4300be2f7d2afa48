use crate::error::AppError;
use crate::ports::surface::TerminalSurface;
use crate::terminal::model::{SessionDescriptor, TerminalId, TerminalKind};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Which highlighting features the spawned process should be wrapped for.
/// Cat colorization and shell input highlighting only apply on top of
/// output highlighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HighlightOptions {
    pub output: bool,
    pub cat_colorization: bool,
    pub shell_input: bool,
}

impl HighlightOptions {
    /// Whether the spawn needs the highlighting proxy at all.
    pub fn is_enabled(&self) -> bool {
        self.output || self.cat_colorization || self.shell_input
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalSpawnOptions {
    pub terminal_id: TerminalId,
    pub working_directory: Option<PathBuf>,
    pub session: Option<SessionDescriptor>,
    pub highlighting: HighlightOptions,
}

#[derive(Debug, Clone)]
pub struct RemoteSpawnOptions {
    pub terminal_id: TerminalId,
    pub kind: TerminalKind,
    pub session: SessionDescriptor,
    pub initial_command: Option<String>,
    pub highlighting: HighlightOptions,
}

/// Creates child processes and wires a PTY to the surface. The returned
/// future resolving is the spawn completion: `Ok(pid)` once the child
/// exists, `Err` when it could not be created at all. The connect timeout
/// for remote spawns is read from the settings provider at call time.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn_local(&self, surface: Arc<dyn TerminalSurface>, options: LocalSpawnOptions) -> Result<u32, AppError>;

    async fn spawn_remote(&self, surface: Arc<dyn TerminalSurface>, options: RemoteSpawnOptions) -> Result<u32, AppError>;
}
