use crate::disk::{DiskTier, DiskTierPolicy};
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::memory::{MemoryTier, MemoryTierPolicy};
use crate::metrics::{CacheMetrics, MetricsRecorder};
use crate::shared::{SharedBackend, SharedTier, SharedTierPolicy};
use crate::tier::{shorter_ttl, TierEntry, TierLevel, TierStats};
use crate::CacheValue;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MEMORY_FULL_RATIO: f64 = 0.95;
const DISK_CLEANUP_RATIO: f64 = 0.80;
const DISK_FULL_RATIO: f64 = 0.90;
const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 10;
const LOW_HIT_RATE: f64 = 0.5;
const FAIR_HIT_RATE: f64 = 0.8;

/// Where Tier 3 lives and how it is bounded.
#[derive(Clone, Debug, PartialEq)]
pub struct DiskLocation {
    pub dir: PathBuf,
    pub policy: DiskTierPolicy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CachePolicy {
    /// Prefix for every key, so several logical caches can share one backend.
    pub namespace: String,
    pub memory: MemoryTierPolicy,
    pub shared: SharedTierPolicy,
    /// `None` disables Tier 3.
    pub disk: Option<DiskLocation>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            namespace: "strata".to_string(),
            memory: MemoryTierPolicy::default(),
            shared: SharedTierPolicy::default(),
            disk: Some(DiskLocation {
                dir: default_disk_dir(),
                policy: DiskTierPolicy::default(),
            }),
        }
    }
}

/// `<tmp>/strata-cache`.
pub fn default_disk_dir() -> PathBuf {
    std::env::temp_dir().join("strata-cache")
}

/// A cache hit and the tier that served it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheHit {
    pub value: CacheValue,
    pub tier: TierLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub namespace: String,
    pub tiers: Vec<TierStats>,
    pub metrics: CacheMetrics,
}

impl CacheStats {
    pub fn tier(&self, level: TierLevel) -> Option<&TierStats> {
        self.tiers.iter().find(|stats| stats.level == level)
    }
}

/// Memory, shared and disk tiers behind one get/set/delete contract.
///
/// Reads probe the tiers fastest first and copy a lower-tier hit into every enabled tier
/// above it. Writes fan out to the requested tiers independently and succeed if any tier
/// accepted. Tier failures are logged and never returned to the caller.
pub struct TieredCache {
    namespace: String,
    memory: MemoryTier,
    shared: SharedTier,
    disk: Option<DiskTier>,
    metrics: Mutex<MetricsRecorder>,
}

impl TieredCache {
    /// Build every tier from `policy`. Only an unparsable shared endpoint is an error; a disk
    /// directory that cannot be created disables Tier 3 with a warning.
    pub fn new(policy: CachePolicy) -> Result<Self, CacheError> {
        let shared = SharedTier::from_policy(&policy.shared, &policy.namespace)?;
        Ok(Self::from_parts(policy, shared))
    }

    /// Like [`TieredCache::new`] but with a caller-provided Tier 2 backend.
    pub fn with_shared_backend(policy: CachePolicy, backend: Arc<dyn SharedBackend>) -> Self {
        let shared = SharedTier::new(backend, &policy.namespace, policy.shared.default_ttl);
        Self::from_parts(policy, shared)
    }

    fn from_parts(policy: CachePolicy, shared: SharedTier) -> Self {
        let disk = policy.disk.and_then(|location| {
            match DiskTier::open(&location.dir, location.policy) {
                Ok(disk) => Some(disk),
                Err(err) => {
                    tracing::warn!(
                        target: "strata.cache",
                        dir = %location.dir.display(),
                        error = %err,
                        "failed to open disk tier; continuing without it"
                    );
                    None
                }
            }
        });

        tracing::debug!(
            target: "strata.cache",
            namespace = %policy.namespace,
            memory_entries = policy.memory.max_entries,
            shared = shared.backend_name(),
            disk = disk.is_some(),
            "tiered cache ready"
        );

        Self {
            namespace: policy.namespace,
            memory: MemoryTier::new(policy.memory),
            shared,
            disk,
            metrics: Mutex::new(MetricsRecorder::default()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build a key in this cache's namespace.
    pub fn key<T: Serialize + ?Sized>(&self, parts: &T) -> Result<CacheKey, CacheError> {
        CacheKey::new(&self.namespace, parts)
    }

    pub fn memory_tier(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn shared_tier(&self) -> &SharedTier {
        &self.shared
    }

    pub fn disk_tier(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.lookup(key).map(|hit| hit.value)
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CacheHit> {
        let start = Instant::now();
        let hit = self.probe(key.as_str());
        self.metrics
            .lock()
            .record_lookup(hit.as_ref().map(|hit| hit.tier), start.elapsed());
        hit
    }

    fn probe(&self, key: &str) -> Option<CacheHit> {
        if let Some(value) = self.memory.get(key) {
            return Some(CacheHit {
                value,
                tier: TierLevel::Memory,
            });
        }

        if let Some(entry) = self.shared.get(key) {
            return Some(self.promote(key, entry, TierLevel::Shared));
        }

        let disk = self.disk.as_ref()?;
        match disk.get(key) {
            Ok(Some(entry)) => Some(self.promote(key, entry, TierLevel::Disk)),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(target: "strata.cache", key, error = %err, "disk tier read failed");
                None
            }
        }
    }

    /// Copy a hit from `found_in` into every enabled tier above it. Copies never outlive the
    /// entry they were made from, nor the default TTL of the tier they land in.
    fn promote(&self, key: &str, entry: TierEntry, found_in: TierLevel) -> CacheHit {
        let value = Arc::new(entry.value);
        let mut promoted = 0;
        let mut evicted = 0;
        if found_in > TierLevel::Shared && self.shared.is_enabled() {
            let ttl = shorter_ttl(entry.ttl, self.shared.default_ttl());
            if self.shared.set(key, &value, ttl) {
                promoted += 1;
            }
        }
        let ttl = shorter_ttl(entry.ttl, self.memory.policy().default_ttl);
        match self.memory.insert(key, value.clone(), ttl) {
            Ok(count) => {
                promoted += 1;
                evicted = count;
            }
            Err(err) => {
                tracing::debug!(
                    target: "strata.cache",
                    key,
                    error = %err,
                    "promotion into memory tier skipped"
                );
            }
        }
        let mut metrics = self.metrics.lock();
        metrics.record_promotions(promoted);
        metrics.record_evictions(evicted as u64);
        CacheHit {
            value,
            tier: found_in,
        }
    }

    /// Write to the requested tiers. Returns `true` if at least one accepted the value.
    pub fn set(&self, key: &CacheKey, value: impl Into<CacheValue>, tiers: &[TierLevel]) -> bool {
        self.write(key, value.into(), tiers, None)
    }

    pub fn set_all(&self, key: &CacheKey, value: impl Into<CacheValue>) -> bool {
        self.write(key, value.into(), &TierLevel::ALL, None)
    }

    /// Write with an explicit TTL that overrides each tier's default.
    pub fn set_with_ttl(
        &self,
        key: &CacheKey,
        value: impl Into<CacheValue>,
        tiers: &[TierLevel],
        ttl: Duration,
    ) -> bool {
        self.write(key, value.into(), tiers, Some(ttl))
    }

    fn write(
        &self,
        key: &CacheKey,
        value: CacheValue,
        tiers: &[TierLevel],
        ttl: Option<Duration>,
    ) -> bool {
        let key = key.as_str();
        let mut accepted = false;
        let mut evicted = 0;
        for level in TierLevel::ALL.into_iter().filter(|level| tiers.contains(level)) {
            match level {
                TierLevel::Memory => match self.memory.insert(key, value.clone(), ttl) {
                    Ok(count) => {
                        accepted = true;
                        evicted += count;
                    }
                    Err(err) => {
                        tracing::debug!(
                            target: "strata.cache",
                            key,
                            error = %err,
                            "memory tier rejected value"
                        );
                    }
                },
                TierLevel::Shared => accepted |= self.shared.set(key, &value, ttl),
                TierLevel::Disk => {
                    let Some(disk) = &self.disk else {
                        continue;
                    };
                    match disk.set(key, &value, ttl) {
                        Ok(()) => accepted = true,
                        Err(err) => {
                            tracing::warn!(
                                target: "strata.cache",
                                key,
                                error = %err,
                                "disk tier write failed"
                            );
                        }
                    }
                }
            }
        }

        let mut metrics = self.metrics.lock();
        metrics.record_write(accepted);
        metrics.record_evictions(evicted as u64);
        accepted
    }

    /// Remove `key` from every tier. Returns `true` if any tier held it.
    pub fn delete(&self, key: &CacheKey) -> bool {
        let key = key.as_str();
        let mut removed = self.memory.remove(key);
        removed |= self.shared.delete(key);
        if let Some(disk) = &self.disk {
            match disk.delete(key) {
                Ok(found) => removed |= found,
                Err(err) => {
                    tracing::warn!(
                        target: "strata.cache",
                        key,
                        error = %err,
                        "disk tier delete failed"
                    );
                }
            }
        }
        removed
    }

    /// Clear the requested tiers. Returns `true` if at least one was cleared.
    pub fn clear(&self, tiers: &[TierLevel]) -> bool {
        let mut cleared = false;
        for level in TierLevel::ALL.into_iter().filter(|level| tiers.contains(level)) {
            match level {
                TierLevel::Memory => {
                    self.memory.clear();
                    cleared = true;
                }
                TierLevel::Shared => cleared |= self.shared.clear(),
                TierLevel::Disk => {
                    let Some(disk) = &self.disk else {
                        continue;
                    };
                    match disk.clear() {
                        Ok(_) => cleared = true,
                        Err(err) => {
                            tracing::warn!(
                                target: "strata.cache",
                                error = %err,
                                "disk tier clear failed"
                            );
                        }
                    }
                }
            }
        }
        tracing::debug!(target: "strata.cache", ?tiers, cleared, "cache cleared");
        cleared
    }

    /// Evict Tier 1 entries down to `ratio` of capacity. Never touches other tiers.
    pub fn trim_fast_tier(&self, ratio: f64) -> usize {
        let evicted = self.memory.trim_to(ratio);
        self.metrics.lock().record_evictions(evicted as u64);
        evicted
    }

    /// Drop every Tier 1 entry. Never touches other tiers.
    pub fn clear_fast_tier(&self) -> usize {
        let evicted = self.memory.clear();
        self.metrics.lock().record_evictions(evicted as u64);
        evicted
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().snapshot()
    }

    pub fn stats(&self) -> CacheStats {
        let mut tiers = vec![TierStats {
            level: TierLevel::Memory,
            enabled: true,
            entries: Some(self.memory.len() as u64),
            capacity_entries: Some(self.memory.capacity() as u64),
            bytes: Some(self.memory.bytes()),
            capacity_bytes: self.memory.policy().max_bytes,
            usage_ratio: Some(self.memory.usage_ratio()),
            connected: None,
        }];

        tiers.push(TierStats {
            level: TierLevel::Shared,
            enabled: self.shared.is_enabled(),
            entries: None,
            capacity_entries: None,
            bytes: None,
            capacity_bytes: None,
            usage_ratio: None,
            connected: Some(self.shared.is_connected()),
        });

        let mut disk_stats = TierStats {
            level: TierLevel::Disk,
            enabled: self.disk.is_some(),
            entries: None,
            capacity_entries: None,
            bytes: None,
            capacity_bytes: None,
            usage_ratio: None,
            connected: None,
        };
        if let Some(disk) = &self.disk {
            disk_stats.capacity_bytes = Some(disk.max_bytes());
            match disk.usage() {
                Ok(usage) => {
                    disk_stats.entries = Some(usage.files as u64);
                    disk_stats.bytes = Some(usage.bytes);
                    disk_stats.usage_ratio = (disk.max_bytes() > 0)
                        .then(|| usage.bytes as f64 / disk.max_bytes() as f64);
                }
                Err(err) => {
                    tracing::debug!(
                        target: "strata.cache",
                        error = %err,
                        "failed to measure disk tier"
                    );
                }
            }
        }
        tiers.push(disk_stats);

        CacheStats {
            namespace: self.namespace.clone(),
            tiers,
            metrics: self.metrics(),
        }
    }

    /// Maintenance pass plus human-readable recommendations.
    ///
    /// Purges expired Tier 1 entries and runs a Tier 3 cleanup when the disk tier is above
    /// 80% of its budget.
    pub fn optimize(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        let purged = self.memory.purge_expired();
        if purged > 0 {
            self.metrics.lock().record_evictions(purged as u64);
        }
        let memory_usage = self.memory.usage_ratio();
        if memory_usage > MEMORY_FULL_RATIO {
            recommendations.push(format!(
                "Tier 1 usage above 95% ({:.0}%); consider raising max_entries or lowering the TTL",
                memory_usage * 100.0
            ));
        }

        if self.shared.is_enabled()
            && !self.shared.is_connected()
            && !self.shared.check_connection()
        {
            recommendations.push(format!(
                "Tier 2 ({}) is unreachable; requests are served from Tiers 1 and 3 only",
                self.shared.backend_name()
            ));
        }

        let metrics = self.metrics();
        if metrics.lookups >= MIN_LOOKUPS_FOR_HIT_RATE {
            if let Some(rate) = metrics.hit_rate {
                if rate < LOW_HIT_RATE {
                    recommendations.push(format!(
                        "Cache hit rate is {:.0}%; review key construction and TTLs",
                        rate * 100.0
                    ));
                }
            }
        }

        if let Some(disk) = &self.disk {
            match disk.usage_ratio() {
                Ok(ratio) if ratio > DISK_CLEANUP_RATIO => match disk.cleanup() {
                    Ok(report) => {
                        self.metrics
                            .lock()
                            .record_evictions(report.removed_files as u64);
                        recommendations.push(format!(
                            "Tier 3 was at {:.0}% of its budget; removed {} old entries",
                            ratio * 100.0,
                            report.removed_files
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "strata.cache",
                            error = %err,
                            "disk tier cleanup failed"
                        );
                    }
                },
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(
                        target: "strata.cache",
                        error = %err,
                        "failed to measure disk tier"
                    );
                }
            }
        }

        recommendations
    }

    /// Overall health in `0..=100`.
    pub fn health_score(&self) -> u8 {
        let mut score: i32 = 100;

        let metrics = self.metrics();
        if metrics.lookups >= MIN_LOOKUPS_FOR_HIT_RATE {
            match metrics.hit_rate {
                Some(rate) if rate < LOW_HIT_RATE => score -= 30,
                Some(rate) if rate < FAIR_HIT_RATE => score -= 15,
                _ => {}
            }
        }

        if self.memory.usage_ratio() > MEMORY_FULL_RATIO {
            score -= 15;
        }

        if self.shared.is_enabled()
            && !self.shared.is_connected()
            && !self.shared.check_connection()
        {
            score -= 20;
        }

        if let Some(disk) = &self.disk {
            if disk.usage_ratio().is_ok_and(|ratio| ratio > DISK_FULL_RATIO) {
                score -= 15;
            }
        }

        score.clamp(0, 100) as u8
    }

    /// Decode a JSON value. Values that fail to decode are treated as misses.
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_slice(&value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::debug!(
                    target: "strata.cache",
                    key = %key,
                    error = %err,
                    "cached value is not valid json"
                );
                None
            }
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        tiers: &[TierLevel],
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, bytes, tiers),
            Err(err) => {
                tracing::warn!(
                    target: "strata.cache",
                    key = %key,
                    error = %err,
                    "failed to encode value as json"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("namespace", &self.namespace)
            .field("memory", &self.memory)
            .field("shared", &self.shared)
            .field("disk", &self.disk)
            .finish()
    }
}
