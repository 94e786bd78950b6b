use crate::policy::SamplerThresholds;
use serde::{Deserialize, Serialize};
use strata_core::{Severity, SystemMemory};

/// One memory reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub timestamp_millis: u64,
    pub resident_bytes: u64,
    pub system: Option<SystemMemory>,
    pub thread_count: Option<usize>,
}

impl MemorySample {
    pub fn new(timestamp_millis: u64, resident_bytes: u64) -> Self {
        Self {
            timestamp_millis,
            resident_bytes,
            system: None,
            thread_count: None,
        }
    }

    /// Resident memory as a percentage of total system memory.
    pub fn resident_percent(&self) -> Option<f64> {
        let system = self.system?;
        if system.total_bytes == 0 {
            return None;
        }
        Some(self.resident_bytes as f64 / system.total_bytes as f64 * 100.0)
    }

    /// Percentage of system memory in use by all processes.
    pub fn system_used_percent(&self) -> Option<f64> {
        self.system.map(|system| system.used_ratio() * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub timestamp_millis: u64,
    pub message: String,
    pub resident_bytes: u64,
}

/// Snapshot returned by [`MemorySampler::metrics`](crate::MemorySampler::metrics).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerMetrics {
    pub running: bool,
    pub interval_secs: f64,
    pub latest: Option<MemorySample>,
    pub thresholds: SamplerThresholds,
    pub samples_retained: usize,
    pub alerts_retained: usize,
    pub callbacks: usize,
}

/// Outcome of a best-effort heap reclamation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub resident_before: Option<u64>,
    pub resident_after: Option<u64>,
    pub freed_bytes: u64,
    /// Whether the allocator reported releasing memory.
    pub released: bool,
    pub elapsed_micros: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("resident memory is unavailable on this platform")]
    ResidentUnavailable,
}
