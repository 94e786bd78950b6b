use crate::error::CacheError;
use crate::CacheValue;
use lru::LruCache;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryTierPolicy {
    /// Maximum number of entries held at once.
    pub max_entries: usize,
    /// Optional bound on the summed value sizes.
    pub max_bytes: Option<u64>,
    /// TTL applied when a write does not specify one. `None` means entries never expire.
    pub default_ttl: Option<Duration>,
}

impl Default for MemoryTierPolicy {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_bytes: None,
            default_ttl: Some(Duration::from_secs(60 * 60)),
        }
    }
}

/// Tier 1: bounded in-process LRU with per-entry expiry.
#[derive(Debug)]
pub struct MemoryTier {
    policy: MemoryTierPolicy,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    lru: LruCache<String, MemoryEntry>,
    bytes: u64,
}

#[derive(Debug)]
struct MemoryEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl MemoryTier {
    pub fn new(policy: MemoryTierPolicy) -> Self {
        Self {
            policy: MemoryTierPolicy {
                max_entries: policy.max_entries.max(1),
                ..policy
            },
            inner: Mutex::new(MemoryInner {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    pub fn policy(&self) -> &MemoryTierPolicy {
        &self.policy
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = inner.lru.peek(key)?.is_expired(now);
        if expired {
            inner.remove(key);
            return None;
        }
        inner.lru.get(key).map(|entry| entry.value.clone())
    }

    /// Insert `value`, evicting least-recently-used entries to stay within bounds.
    ///
    /// Returns the number of entries evicted to make room.
    pub fn insert(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError> {
        let size = value.len() as u64;
        if let Some(limit) = self.policy.max_bytes {
            if size > limit {
                return Err(CacheError::ValueTooLarge { size, limit });
            }
        }

        let now = Instant::now();
        let ttl = ttl.or(self.policy.default_ttl);
        let mut inner = self.inner.lock();
        inner.remove(key);
        inner.lru.put(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
        inner.bytes = inner.bytes.saturating_add(size);

        let mut evicted = 0;
        while inner.lru.len() > self.policy.max_entries || self.over_bytes(inner.bytes) {
            if inner.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        Ok(evicted)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key)
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.lru.len();
        inner.lru.clear();
        inner.bytes = 0;
        removed
    }

    /// Evict least-recently-used entries until occupancy is at most `ratio` of capacity.
    pub fn trim_to(&self, ratio: f64) -> usize {
        let ratio = ratio.clamp(0.0, 1.0);
        let target_entries = (self.policy.max_entries as f64 * ratio).floor() as usize;
        let target_bytes = self
            .policy
            .max_bytes
            .map(|max| (max as f64 * ratio).floor() as u64);

        let mut inner = self.inner.lock();
        let mut evicted = 0;
        while inner.lru.len() > target_entries
            || target_bytes.is_some_and(|target| inner.bytes > target)
        {
            if inner.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Remove entries whose TTL has elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .lru
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.policy.max_entries
    }

    pub fn bytes(&self) -> u64 {
        self.inner.lock().bytes
    }

    /// Occupancy in `0.0..=1.0`, taking the tighter of the entry and byte bounds.
    pub fn usage_ratio(&self) -> f64 {
        let inner = self.inner.lock();
        let by_count = inner.lru.len() as f64 / self.policy.max_entries as f64;
        let by_bytes = match self.policy.max_bytes {
            Some(max) if max > 0 => inner.bytes as f64 / max as f64,
            _ => 0.0,
        };
        by_count.max(by_bytes)
    }

    fn over_bytes(&self, bytes: u64) -> bool {
        self.policy.max_bytes.is_some_and(|max| bytes > max)
    }
}

impl MemoryInner {
    fn remove(&mut self, key: &str) -> bool {
        match self.lru.pop(key) {
            Some(prev) => {
                self.bytes = self.bytes.saturating_sub(prev.value.len() as u64);
                true
            }
            None => false,
        }
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (key, entry) = self.lru.pop_lru()?;
        self.bytes = self.bytes.saturating_sub(entry.value.len() as u64);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn value(bytes: &[u8]) -> CacheValue {
        Arc::new(bytes.to_vec())
    }

    fn tier(max_entries: usize) -> MemoryTier {
        MemoryTier::new(MemoryTierPolicy {
            max_entries,
            max_bytes: None,
            default_ttl: None,
        })
    }

    #[test]
    fn evicts_least_recently_used_entry() {
        let tier = tier(2);
        tier.insert("a", value(b"1"), None).unwrap();
        tier.insert("b", value(b"2"), None).unwrap();
        assert_eq!(tier.insert("c", value(b"3"), None).unwrap(), 1);

        assert!(tier.get("a").is_none());
        assert_eq!(tier.get("b").as_deref().map(Vec::as_slice), Some(&b"2"[..]));
        assert_eq!(tier.get("c").as_deref().map(Vec::as_slice), Some(&b"3"[..]));
    }

    #[test]
    fn reads_refresh_recency() {
        let tier = tier(2);
        tier.insert("a", value(b"1"), None).unwrap();
        tier.insert("b", value(b"2"), None).unwrap();
        tier.get("a");
        tier.insert("c", value(b"3"), None).unwrap();

        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
    }

    #[test]
    fn expired_entries_miss() {
        let tier = tier(10);
        tier.insert("short", value(b"x"), Some(Duration::from_millis(20)))
            .unwrap();
        tier.insert("long", value(b"y"), Some(Duration::from_secs(60)))
            .unwrap();
        assert!(tier.get("short").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(tier.get("short").is_none());
        assert!(tier.get("long").is_some());
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn byte_budget_is_enforced() {
        let tier = MemoryTier::new(MemoryTierPolicy {
            max_entries: 100,
            max_bytes: Some(10),
            default_ttl: None,
        });
        tier.insert("a", value(&[0; 4]), None).unwrap();
        tier.insert("b", value(&[0; 4]), None).unwrap();
        tier.insert("c", value(&[0; 4]), None).unwrap();
        assert_eq!(tier.bytes(), 8);
        assert!(tier.get("a").is_none());

        let err = tier.insert("huge", value(&[0; 11]), None).unwrap_err();
        assert!(matches!(err, CacheError::ValueTooLarge { size: 11, limit: 10 }));
    }

    #[test]
    fn overwrite_replaces_byte_accounting() {
        let tier = tier(10);
        tier.insert("a", value(&[0; 8]), None).unwrap();
        tier.insert("a", value(&[0; 3]), None).unwrap();
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.bytes(), 3);
    }

    #[test]
    fn trim_to_ratio() {
        let tier = tier(8);
        for i in 0..8 {
            tier.insert(&format!("k{i}"), value(b"v"), None).unwrap();
        }
        assert_eq!(tier.trim_to(0.75), 2);
        assert_eq!(tier.len(), 6);
        assert!(tier.get("k0").is_none());
        assert!(tier.get("k7").is_some());

        assert_eq!(tier.clear(), 6);
        assert!(tier.is_empty());
        assert_eq!(tier.bytes(), 0);
    }
}
