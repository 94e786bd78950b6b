use crate::process;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Host-wide memory figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMemory {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl SystemMemory {
    /// Fraction of system memory in use, `0.0..=1.0`.
    pub fn used_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64
    }
}

/// Source of memory readings.
///
/// Production code uses [`SystemProbe`]; tests substitute fixed or scripted readings.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size of the current process.
    fn resident_bytes(&self) -> Option<u64>;

    /// Host memory totals.
    fn system_memory(&self) -> Option<SystemMemory>;

    /// Number of OS threads in the current process.
    fn thread_count(&self) -> Option<usize> {
        None
    }
}

/// [`MemoryProbe`] backed by procfs (Linux) and `sysinfo` (everywhere).
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn sysinfo_resident_bytes(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe").finish_non_exhaustive()
    }
}

impl MemoryProbe for SystemProbe {
    fn resident_bytes(&self) -> Option<u64> {
        process::current_rss_bytes().or_else(|| self.sysinfo_resident_bytes())
    }

    fn system_memory(&self) -> Option<SystemMemory> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return None;
        }
        Some(SystemMemory {
            total_bytes,
            available_bytes: system.available_memory(),
        })
    }

    fn thread_count(&self) -> Option<usize> {
        process::current_thread_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_ratio_handles_empty_totals() {
        let empty = SystemMemory {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_ratio(), 0.0);

        let half = SystemMemory {
            total_bytes: 1_000,
            available_bytes: 500,
        };
        assert!((half.used_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn system_probe_reports_host_memory() {
        let probe = SystemProbe::new();
        if let Some(memory) = probe.system_memory() {
            assert!(memory.total_bytes >= memory.available_bytes);
        }
    }
}
