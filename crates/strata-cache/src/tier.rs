use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One physical backing store in the hierarchy, ordered fastest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Memory,
    Shared,
    Disk,
}

impl TierLevel {
    pub const ALL: [TierLevel; 3] = [TierLevel::Memory, TierLevel::Shared, TierLevel::Disk];

    pub fn as_str(self) -> &'static str {
        match self {
            TierLevel::Memory => "memory",
            TierLevel::Shared => "shared",
            TierLevel::Disk => "disk",
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupancy and connectivity of one tier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TierStats {
    pub level: TierLevel,
    pub enabled: bool,
    pub entries: Option<u64>,
    pub capacity_entries: Option<u64>,
    pub bytes: Option<u64>,
    pub capacity_bytes: Option<u64>,
    /// Occupancy in `0.0..=1.0` where a bound exists.
    pub usage_ratio: Option<f64>,
    /// Only reported for the shared tier.
    pub connected: Option<bool>,
}

/// A value read from a lower tier together with how long it has left to live there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierEntry {
    pub value: Vec<u8>,
    /// `None` when the entry never expires.
    pub ttl: Option<Duration>,
}

/// The shorter of two optional lifetimes, where `None` means unbounded.
pub(crate) fn shorter_ttl(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
