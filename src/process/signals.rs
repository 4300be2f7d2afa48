use crate::error::AppError;
use std::sync::Arc;

/// Signals sent to terminal child processes.
pub trait ProcessControl: Send + Sync {
    /// Non-destructive existence probe.
    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the child to hang up. With `group`, the whole process group
    /// gets the signal.
    fn hangup(&self, pid: u32, group: bool) -> Result<(), AppError>;

    /// Forcefully kill the process group `pid` belongs to.
    fn kill_group(&self, pid: u32) -> Result<(), AppError>;
}

#[cfg(unix)]
mod unix {
    use super::ProcessControl;
    use crate::error::AppError;
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};
    use tracing::debug;

    fn map_errno(pid: u32, errno: Errno, action: &str) -> AppError {
        match errno {
            Errno::ESRCH => AppError::ProcessGone(pid),
            other => AppError::ProcessError(format!("Failed to {} process {}: {}", action, pid, other)),
        }
    }

    /// Pid 0 and values past `i32::MAX` would signal whole groups.
    fn to_pid(pid: u32) -> Result<Pid, AppError> {
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
            _ => Err(AppError::InvalidInputArgument(format!("pid {} out of range", pid))),
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct NixProcessControl;

    impl ProcessControl for NixProcessControl {
        fn is_alive(&self, pid: u32) -> bool {
            let Ok(target) = to_pid(pid) else {
                return false;
            };
            match kill(target, None) {
                Ok(()) => true,
                // Exists but belongs to someone else.
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }

        fn hangup(&self, pid: u32, group: bool) -> Result<(), AppError> {
            let target = to_pid(pid)?;
            if group {
                let pgid = getpgid(Some(target)).map_err(|e| map_errno(pid, e, "look up group of"))?;
                debug!(pid, pgid = pgid.as_raw(), "Sending SIGHUP to process group");
                killpg(pgid, Signal::SIGHUP).map_err(|e| map_errno(pid, e, "hang up group of"))
            } else {
                debug!(pid, "Sending SIGHUP to process");
                kill(target, Signal::SIGHUP).map_err(|e| map_errno(pid, e, "hang up"))
            }
        }

        fn kill_group(&self, pid: u32) -> Result<(), AppError> {
            let target = to_pid(pid)?;
            let pgid = getpgid(Some(target)).map_err(|e| map_errno(pid, e, "look up group of"))?;
            debug!(pid, pgid = pgid.as_raw(), "Sending SIGKILL to process group");
            killpg(pgid, Signal::SIGKILL).map_err(|e| map_errno(pid, e, "kill group of"))
        }
    }
}

#[cfg(unix)]
pub use unix::NixProcessControl;

/// Stand-in where process signals are unavailable. Everything reports the
/// process as gone so callers fall through to plain cleanup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProcessControl;

impl ProcessControl for NoopProcessControl {
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn hangup(&self, pid: u32, _group: bool) -> Result<(), AppError> {
        Err(AppError::ProcessGone(pid))
    }

    fn kill_group(&self, pid: u32) -> Result<(), AppError> {
        Err(AppError::ProcessGone(pid))
    }
}

pub fn default_process_control() -> Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        Arc::new(NixProcessControl)
    }
    #[cfg(not(unix))]
    {
        Arc::new(NoopProcessControl)
    }
}
