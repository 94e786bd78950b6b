use crate::error::CacheError;
use crate::key::sha256_hex;
use crate::tier::{shorter_ttl, TierEntry};
use crate::util::{
    atomic_write, bincode_deserialize, bincode_serialize, read_file_limited,
    remove_file_best_effort, TMP_MARKER,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use strata_core::{now_millis, GB};

pub const DISK_RECORD_SCHEMA_VERSION: u32 = 1;

const ENTRY_EXTENSION: &str = "bin";

#[derive(Clone, Debug, PartialEq)]
pub struct DiskTierPolicy {
    /// Upper bound on the summed size of entry files.
    pub max_bytes: u64,
    /// Entries older than this are misses. `None` disables age-based expiry.
    pub ttl: Option<Duration>,
    /// Fraction of entry files removed, oldest first, by one cleanup pass.
    pub cleanup_fraction: f64,
}

impl Default for DiskTierPolicy {
    fn default() -> Self {
        Self {
            max_bytes: GB,
            ttl: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            cleanup_fraction: 0.25,
        }
    }
}

/// Counters from one maintenance pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiskCleanup {
    pub removed_files: usize,
    pub removed_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Tier 3: one versioned bincode record per key under `root`.
///
/// File names are the SHA-256 of the key; the full key is stored in the record and checked on
/// read. Every operation takes the same lock, so budget accounting and cleanup never race
/// with writers in this process.
#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    policy: DiskTierPolicy,
    lock: Mutex<()>,
}

#[derive(Serialize)]
struct DiskRecord<'a> {
    schema_version: u32,
    saved_at_millis: u64,
    expires_at_millis: Option<u64>,
    key: &'a str,
    value: &'a [u8],
}

#[derive(Deserialize)]
struct DiskRecordOwned {
    schema_version: u32,
    saved_at_millis: u64,
    expires_at_millis: Option<u64>,
    key: String,
    value: Vec<u8>,
}

struct EntryFile {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

impl DiskTier {
    /// Open (creating if needed) the tier rooted at `root` and run a startup GC pass.
    pub fn open(root: impl AsRef<Path>, policy: DiskTierPolicy) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let tier = Self {
            root,
            policy,
            lock: Mutex::new(()),
        };
        match tier.gc() {
            Ok(report) if report.removed_files > 0 => {
                tracing::debug!(
                    target: "strata.cache",
                    root = %tier.root.display(),
                    removed_files = report.removed_files,
                    removed_bytes = report.removed_bytes,
                    "disk tier startup gc"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    target: "strata.cache",
                    root = %tier.root.display(),
                    error = %err,
                    "disk tier startup gc failed"
                );
            }
        }
        Ok(tier)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &DiskTierPolicy {
        &self.policy
    }

    pub fn max_bytes(&self) -> u64 {
        self.policy.max_bytes
    }

    /// Read `key`. The returned entry carries whatever lifetime it has left under both its own
    /// TTL and the tier's age limit.
    pub fn get(&self, key: &str) -> Result<Option<TierEntry>, CacheError> {
        let _guard = self.lock.lock();
        let path = self.entry_path(key);
        let Some(bytes) = read_file_limited(&path) else {
            return Ok(None);
        };

        let record: DiskRecordOwned = match bincode_deserialize(&bytes) {
            Ok(record) => record,
            Err(err) => {
                tracing::debug!(
                    target: "strata.cache",
                    path = %path.display(),
                    error = %err,
                    "dropping corrupt disk cache entry"
                );
                remove_file_best_effort(&path, "get.corrupt");
                return Ok(None);
            }
        };

        if record.schema_version != DISK_RECORD_SCHEMA_VERSION || record.key != key {
            remove_file_best_effort(&path, "get.mismatch");
            return Ok(None);
        }

        let now = now_millis();
        if self.is_expired(&record, now) {
            remove_file_best_effort(&path, "get.expired");
            return Ok(None);
        }

        let ttl = self.remaining_ttl(&record, now);
        Ok(Some(TierEntry {
            value: record.value,
            ttl,
        }))
    }

    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = now_millis();
        let record = DiskRecord {
            schema_version: DISK_RECORD_SCHEMA_VERSION,
            saved_at_millis: now,
            expires_at_millis: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64)),
            key,
            value,
        };
        let bytes = bincode_serialize(&record)?;
        let size = bytes.len() as u64;
        if size > self.policy.max_bytes {
            return Err(CacheError::ValueTooLarge {
                size,
                limit: self.policy.max_bytes,
            });
        }

        let _guard = self.lock.lock();
        let path = self.entry_path(key);
        self.make_room(&path, size)?;
        atomic_write(&path, &bytes)
    }

    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let _guard = self.lock.lock();
        let path = self.entry_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every entry file. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let _guard = self.lock.lock();
        let mut removed = 0;
        for entry in self.entry_files()? {
            if remove_file_best_effort(&entry.path, "clear") {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn usage(&self) -> Result<DiskUsage, CacheError> {
        let _guard = self.lock.lock();
        let entries = self.entry_files()?;
        Ok(DiskUsage {
            files: entries.len(),
            bytes: entries.iter().map(|entry| entry.len).sum(),
        })
    }

    pub fn usage_ratio(&self) -> Result<f64, CacheError> {
        let usage = self.usage()?;
        if self.policy.max_bytes == 0 {
            return Ok(0.0);
        }
        Ok(usage.bytes as f64 / self.policy.max_bytes as f64)
    }

    /// Remove the oldest `cleanup_fraction` of entry files (at least one) by modification
    /// time.
    pub fn cleanup(&self) -> Result<DiskCleanup, CacheError> {
        let _guard = self.lock.lock();
        let mut entries = self.entry_files()?;
        Ok(self.remove_oldest(&mut entries))
    }

    /// Remove stray temp files plus corrupt, mismatched and expired entries, then enforce
    /// the byte budget.
    pub fn gc(&self) -> Result<DiskCleanup, CacheError> {
        let _guard = self.lock.lock();
        let now = now_millis();
        let mut report = DiskCleanup::default();

        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(err) => return Err(err.into()),
        };

        for entry in dir.flatten() {
            let path = entry.path();
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            let keep = if is_entry_path(&path) {
                self.entry_is_live(&path, now)
            } else {
                // Leftovers such as crashed atomic-write temp files.
                !path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.contains(TMP_MARKER))
            };
            if !keep && remove_file_best_effort(&path, "gc") {
                report.removed_files += 1;
                report.removed_bytes += meta.len();
            }
        }

        let mut entries = self.entry_files()?;
        let mut total: u64 = entries.iter().map(|entry| entry.len).sum();
        while total > self.policy.max_bytes && !entries.is_empty() {
            let pass = self.remove_oldest(&mut entries);
            if pass.removed_files == 0 {
                break;
            }
            total = total.saturating_sub(pass.removed_bytes);
            report.removed_files += pass.removed_files;
            report.removed_bytes += pass.removed_bytes;
        }

        Ok(report)
    }

    fn entry_is_live(&self, path: &Path, now: u64) -> bool {
        let Some(bytes) = read_file_limited(path) else {
            return false;
        };
        let Ok(record) = bincode_deserialize::<DiskRecordOwned>(&bytes) else {
            return false;
        };
        record.schema_version == DISK_RECORD_SCHEMA_VERSION
            && path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem == sha256_hex(record.key.as_bytes()))
            && !self.is_expired(&record, now)
    }

    fn is_expired(&self, record: &DiskRecordOwned, now: u64) -> bool {
        if record.expires_at_millis.is_some_and(|at| now >= at) {
            return true;
        }
        self.policy.ttl.is_some_and(|ttl| {
            now.saturating_sub(record.saved_at_millis) > ttl.as_millis() as u64
        })
    }

    fn remaining_ttl(&self, record: &DiskRecordOwned, now: u64) -> Option<Duration> {
        let explicit = record
            .expires_at_millis
            .map(|at| Duration::from_millis(at.saturating_sub(now)));
        let aged = self.policy.ttl.map(|ttl| {
            let deadline = record.saved_at_millis.saturating_add(ttl.as_millis() as u64);
            Duration::from_millis(deadline.saturating_sub(now))
        });
        shorter_ttl(explicit, aged)
    }

    /// Run cleanup passes until `incoming` more bytes fit in the budget. Must hold the lock.
    fn make_room(&self, target: &Path, incoming: u64) -> Result<(), CacheError> {
        // The file being replaced does not count against the budget.
        let mut entries: Vec<EntryFile> = self
            .entry_files()?
            .into_iter()
            .filter(|entry| entry.path != target)
            .collect();
        let mut total: u64 = entries.iter().map(|entry| entry.len).sum();

        while total.saturating_add(incoming) > self.policy.max_bytes {
            let pass = self.remove_oldest(&mut entries);
            if pass.removed_files == 0 {
                return Err(CacheError::BudgetExhausted {
                    needed: incoming,
                    budget: self.policy.max_bytes,
                });
            }
            total = total.saturating_sub(pass.removed_bytes);
            tracing::debug!(
                target: "strata.cache",
                removed_files = pass.removed_files,
                removed_bytes = pass.removed_bytes,
                remaining_bytes = total,
                "disk tier cleanup"
            );
        }
        Ok(())
    }

    /// Remove the oldest slice of `entries` and drop them from the list.
    fn remove_oldest(&self, entries: &mut Vec<EntryFile>) -> DiskCleanup {
        let mut report = DiskCleanup::default();
        if entries.is_empty() {
            return report;
        }
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        let count = ((entries.len() as f64 * self.policy.cleanup_fraction).floor() as usize)
            .clamp(1, entries.len());

        for entry in entries.drain(..count) {
            if remove_file_best_effort(&entry.path, "cleanup") {
                report.removed_files += 1;
                report.removed_bytes += entry.len;
            }
        }
        report
    }

    fn entry_files(&self) -> Result<Vec<EntryFile>, CacheError> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        for entry in dir.flatten() {
            let path = entry.path();
            if !is_entry_path(&path) {
                continue;
            }
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            out.push(EntryFile {
                len: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            });
        }
        Ok(out)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", sha256_hex(key.as_bytes())))
    }
}

fn is_entry_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION)
}
