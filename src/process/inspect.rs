use crate::error::AppError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex}; // sysinfo is sync
use sysinfo::{Pid, System};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmdline: Vec<String>,
}

/// Read-only view of the OS process tree.
pub trait ProcessInspector: Send + Sync {
    /// Number of direct children of `pid`. `Err(ProcessGone)` when `pid`
    /// no longer exists.
    fn child_count(&self, pid: u32) -> Result<usize, AppError>;

    /// Every process below `pid`, breadth first.
    fn descendants(&self, pid: u32) -> Result<Vec<ProcessEntry>, AppError>;
}

#[derive(Debug)]
pub struct SysinfoInspector {
    system: Arc<StdMutex<System>>, // Mutex for interior mutability of System
}

impl SysinfoInspector {
    /// Fails with `Unsupported` where sysinfo cannot enumerate processes;
    /// callers then skip process-tree features entirely.
    pub fn new() -> Result<Self, AppError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            debug!("Process inspection is not supported on this platform");
            return Err(AppError::Unsupported("process inspection".into()));
        }
        Ok(Self {
            system: Arc::new(StdMutex::new(System::new())),
        })
    }

    fn snapshot(&self) -> Result<HashMap<u32, ProcessEntry>, AppError> {
        let mut sys_guard = self
            .system
            .lock()
            .map_err(|e| AppError::ProcessError(format!("Failed to lock system mutex: {}", e)))?;
        sys_guard.refresh_processes();
        Ok(sys_guard
            .processes()
            .iter()
            .map(|(pid, process)| {
                let entry = ProcessEntry {
                    pid: pid.as_u32(),
                    parent: process.parent().map(|p| p.as_u32()),
                    name: process.name().to_string(),
                    cmdline: process.cmd().to_vec(),
                };
                (entry.pid, entry)
            })
            .collect())
    }

    fn ensure_exists(processes: &HashMap<u32, ProcessEntry>, pid: u32) -> Result<(), AppError> {
        if processes.contains_key(&Pid::from_u32(pid).as_u32()) {
            Ok(())
        } else {
            Err(AppError::ProcessGone(pid))
        }
    }
}

impl ProcessInspector for SysinfoInspector {
    fn child_count(&self, pid: u32) -> Result<usize, AppError> {
        let processes = self.snapshot()?;
        Self::ensure_exists(&processes, pid)?;
        Ok(processes.values().filter(|p| p.parent == Some(pid)).count())
    }

    fn descendants(&self, pid: u32) -> Result<Vec<ProcessEntry>, AppError> {
        let processes = self.snapshot()?;
        Self::ensure_exists(&processes, pid)?;
        Ok(collect_descendants(&processes, pid))
    }
}

/// Breadth-first walk of a `pid -> entry` table.
pub fn collect_descendants(processes: &HashMap<u32, ProcessEntry>, root: u32) -> Vec<ProcessEntry> {
    let mut children: HashMap<u32, Vec<&ProcessEntry>> = HashMap::new();
    for entry in processes.values() {
        if let Some(parent) = entry.parent {
            children.entry(parent).or_default().push(entry);
        }
    }
    for list in children.values_mut() {
        list.sort_by_key(|e| e.pid);
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        if let Some(list) = children.get(&current) {
            for entry in list {
                // A pid reused as its own ancestor would loop forever.
                if entry.pid != root && !found.iter().any(|f: &ProcessEntry| f.pid == entry.pid) {
                    found.push((*entry).clone());
                    queue.push_back(entry.pid);
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, parent: Option<u32>, name: &str) -> (u32, ProcessEntry) {
        (
            pid,
            ProcessEntry {
                pid,
                parent,
                name: name.to_string(),
                cmdline: vec![name.to_string()],
            },
        )
    }

    #[test]
    fn descendants_are_walked_breadth_first() {
        let table: HashMap<_, _> = [
            entry(1, None, "init"),
            entry(10, Some(1), "bash"),
            entry(11, Some(10), "tmux"),
            entry(12, Some(10), "vim"),
            entry(13, Some(11), "ssh"),
            entry(20, Some(1), "other"),
        ]
        .into_iter()
        .collect();
        let pids: Vec<u32> = collect_descendants(&table, 10).into_iter().map(|e| e.pid).collect();
        assert_eq!(pids, vec![11, 12, 13]);
    }

    #[test]
    fn leaf_has_no_descendants() {
        let table: HashMap<_, _> = [entry(1, None, "init"), entry(2, Some(1), "sh")].into_iter().collect();
        assert!(collect_descendants(&table, 2).is_empty());
    }

    #[test]
    fn own_process_is_visible_to_sysinfo() {
        let Ok(inspector) = SysinfoInspector::new() else {
            return;
        };
        let me = std::process::id();
        assert!(inspector.child_count(me).is_ok());
        assert!(matches!(inspector.child_count(u32::MAX - 1), Err(AppError::ProcessGone(_))));
    }

    #[test]
    fn unsupported_platform_is_reported() {
        match SysinfoInspector::new() {
            Ok(_) => assert!(sysinfo::IS_SUPPORTED_SYSTEM),
            Err(e) => assert!(matches!(e, AppError::Unsupported(_))),
        }
    }
}
