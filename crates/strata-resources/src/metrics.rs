use crate::policy::ResourceState;
use serde::Serialize;

/// Per-resource view in [`ResourceMemoryMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub key: String,
    pub state: ResourceState,
    pub priority: u8,
    pub essential: bool,
    /// Tracked footprint while loaded.
    pub footprint_bytes: Option<u64>,
    /// Most recent measured footprint, kept across unloads.
    pub last_measured_bytes: Option<u64>,
    pub access_count: u64,
    pub load_count: u64,
    pub failed_loads: u64,
    pub idle_secs: Option<f64>,
    pub avg_load_millis: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceMemoryMetrics {
    pub budget_bytes: u64,
    pub used_bytes: u64,
    /// Estimates held by loads that are still running.
    pub reserved_bytes: u64,
    pub usage_ratio: f64,
    pub loaded_count: usize,
    pub registered_count: usize,
    pub resident_bytes: Option<u64>,
    pub resources: Vec<ResourceUsage>,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub unloaded: Vec<String>,
    pub freed_bytes: u64,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.unloaded.is_empty()
    }
}
