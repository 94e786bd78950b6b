use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::{DEFAULT_JOIN_TIMEOUT, GB, MB};

/// Highest accepted priority; larger values are clamped.
pub const MAX_PRIORITY: u8 = 10;
/// Priorities strictly above this are essential: only emergency passes, forced unloads and
/// shutdown remove them.
pub const ESSENTIAL_PRIORITY_CUTOFF: u8 = 8;
/// Priorities at or above this are skipped by the normal idle reaper.
pub const HIGH_PRIORITY: u8 = 7;

/// Multiplier applied to the last measured footprint when estimating the next load.
pub const FOOTPRINT_SAFETY_FACTOR: f64 = 1.2;

pub fn is_essential(priority: u8) -> bool {
    priority > ESSENTIAL_PRIORITY_CUTOFF
}

pub fn is_high_priority(priority: u8) -> bool {
    priority >= HIGH_PRIORITY
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePolicy {
    /// Upper bound on the summed tracked footprint of loaded resources.
    pub budget_bytes: u64,
    /// Idle time after which the normal reaper unloads a resource.
    pub idle_threshold: Duration,
    pub reaper_interval: Duration,
    /// Share of currently available system memory a single load may claim.
    pub system_memory_fraction: f64,
    /// Estimate used before a resource has ever been measured and without a hint.
    pub default_footprint_bytes: u64,
    /// Loaded-resource count above which a recommendation is emitted.
    pub max_loaded_hint: usize,
    /// Resources idle for longer than this are called out in recommendations.
    pub long_idle_threshold: Duration,
    pub join_timeout: Duration,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            budget_bytes: 4 * GB,
            idle_threshold: Duration::from_secs(30 * 60),
            reaper_interval: Duration::from_secs(60),
            system_memory_fraction: 0.8,
            default_footprint_bytes: 512 * MB,
            max_loaded_hint: 5,
            long_idle_threshold: Duration::from_secs(60 * 60),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// How hard an eviction pass works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapMode {
    /// Idle past the threshold and below [`HIGH_PRIORITY`].
    Normal,
    /// Idle past half the threshold and not essential.
    Aggressive,
    /// Everything, essential included.
    Emergency,
}

impl ReapMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReapMode::Normal => "normal",
            ReapMode::Aggressive => "aggressive",
            ReapMode::Emergency => "emergency",
        }
    }

    /// Whether a resource with `priority`, idle for `idle`, is evictable in this mode.
    pub fn selects(self, priority: u8, idle: Duration, threshold: Duration) -> bool {
        match self {
            ReapMode::Normal => !is_high_priority(priority) && idle > threshold,
            ReapMode::Aggressive => !is_essential(priority) && idle > threshold / 2,
            ReapMode::Emergency => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Unloaded,
    Loading,
    Loaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands() {
        assert!(!is_essential(8));
        assert!(is_essential(9));
        assert!(!is_high_priority(6));
        assert!(is_high_priority(7));
    }

    #[test]
    fn reap_mode_selection() {
        let threshold = Duration::from_secs(100);
        let idle_long = Duration::from_secs(101);
        let idle_half = Duration::from_secs(60);

        assert!(ReapMode::Normal.selects(6, idle_long, threshold));
        assert!(!ReapMode::Normal.selects(7, idle_long, threshold));
        assert!(!ReapMode::Normal.selects(0, idle_half, threshold));

        assert!(ReapMode::Aggressive.selects(8, idle_half, threshold));
        assert!(!ReapMode::Aggressive.selects(9, idle_long, threshold));

        assert!(ReapMode::Emergency.selects(10, Duration::ZERO, threshold));
    }
}
