//! Three-tier cache hierarchy.
//!
//! - Tier 1 ([`MemoryTier`]): bounded in-process LRU with per-entry TTL.
//! - Tier 2 ([`SharedTier`]): optional networked store behind [`SharedBackend`]
//!   ([`RedisBackend`] when an endpoint is configured, [`NullBackend`] otherwise).
//! - Tier 3 ([`DiskTier`]): versioned bincode records under a byte budget.
//!
//! [`TieredCache`] probes the tiers in order and promotes lower-tier hits upward. Every tier
//! failure degrades to a miss or a rejected write; nothing below the hierarchy is fatal.

mod disk;
mod error;
mod hierarchy;
mod key;
mod memory;
mod metrics;
mod shared;
mod tier;
mod util;

use std::sync::Arc;

/// Cached bytes. Eviction only drops the cache's reference.
pub type CacheValue = Arc<Vec<u8>>;

pub use disk::{DiskCleanup, DiskTier, DiskTierPolicy, DiskUsage, DISK_RECORD_SCHEMA_VERSION};
pub use error::{CacheError, Result};
pub use hierarchy::{
    default_disk_dir, CacheHit, CachePolicy, CacheStats, DiskLocation, TieredCache,
};
pub use key::CacheKey;
pub use memory::{MemoryTier, MemoryTierPolicy};
pub use metrics::{CacheMetrics, LATENCY_WINDOW};
pub use shared::{NullBackend, RedisBackend, SharedBackend, SharedTier, SharedTierPolicy};
pub use tier::{TierEntry, TierLevel, TierStats};
