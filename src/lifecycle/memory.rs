//! Resident memory readings.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of the current resident memory of the worker, in bytes.
pub trait MemoryProbe: Send + Sync {
    fn current(&self) -> u64;
}

/// Reads the resident set size of this process through `sysinfo`.
pub struct ProcessMemory {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                tracing::warn!(err, "cannot determine current pid; memory readings disabled");
                None
            }
        };
        Self { pid, system: Mutex::new(System::new()) }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemory {
    fn current(&self) -> u64 {
        let Some(pid) = self.pid else { return 0 };
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ProcessMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemory").field("pid", &self.pid).finish()
    }
}

/// Probe returning a settable value; for tests and simulations.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{FixedMemory, MemoryProbe};
///
/// let probe = FixedMemory::new(1024);
/// probe.set(4096);
/// assert_eq!(probe.current(), 4096);
/// ```
#[derive(Debug, Default)]
pub struct FixedMemory {
    bytes: AtomicU64,
}

impl FixedMemory {
    pub fn new(bytes: u64) -> Self {
        Self { bytes: AtomicU64::new(bytes) }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemory {
    fn current(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}
