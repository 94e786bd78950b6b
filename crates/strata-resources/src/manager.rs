use crate::metrics::{ReapReport, ResourceMemoryMetrics, ResourceUsage};
use crate::policy::{
    is_essential, ReapMode, ResourcePolicy, ResourceState, FOOTPRINT_SAFETY_FACTOR, MAX_PRIORITY,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{format_bytes, process, BackgroundLoop, MemoryProbe, SystemProbe};

/// Zero-argument constructor for a resource.
pub type Loader<R> = Arc<dyn Fn() -> anyhow::Result<Arc<R>> + Send + Sync>;

/// Registry of named, lazily loaded resources under a memory budget.
///
/// Each key moves through `Unloaded -> Loading -> Loaded -> Unloaded`. Bookkeeping lives
/// behind one registry lock that is never held while a loader runs; a per-key load lock
/// keeps two threads from loading the same key at once. Loads in flight reserve their
/// estimated footprint so concurrent loads of different keys cannot jointly overshoot the
/// budget.
pub struct ResourceManager<R: ?Sized + Send + Sync + 'static> {
    inner: Arc<Inner<R>>,
    reaper: Mutex<Option<BackgroundLoop>>,
}

struct Inner<R: ?Sized> {
    policy: ResourcePolicy,
    probe: Arc<dyn MemoryProbe>,
    registry: Mutex<Registry<R>>,
}

struct Registry<R: ?Sized> {
    entries: HashMap<String, Entry<R>>,
    reserved_bytes: u64,
}

struct Entry<R: ?Sized> {
    loader: Loader<R>,
    priority: u8,
    footprint_hint: Option<u64>,
    load_lock: Arc<Mutex<()>>,
    loading: bool,
    loaded: Option<Loaded<R>>,
    stats: EntryStats,
}

struct Loaded<R: ?Sized> {
    instance: Arc<R>,
    footprint_bytes: u64,
}

#[derive(Default)]
struct EntryStats {
    load_count: u64,
    failed_loads: u64,
    access_count: u64,
    total_load_time: Duration,
    last_measured_bytes: Option<u64>,
    last_access: Option<Instant>,
    last_load: Option<Instant>,
}

impl<R: ?Sized + Send + Sync + 'static> ResourceManager<R> {
    pub fn new(policy: ResourcePolicy) -> Self {
        Self::with_probe(policy, Arc::new(SystemProbe::new()))
    }

    pub fn with_probe(policy: ResourcePolicy, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                probe,
                registry: Mutex::new(Registry {
                    entries: HashMap::new(),
                    reserved_bytes: 0,
                }),
            }),
            reaper: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.inner.policy
    }

    /// Register (or replace) the loader for `key`. Nothing is loaded.
    pub fn register_loader<F>(&self, key: impl Into<String>, loader: F, priority: u8)
    where
        F: Fn() -> anyhow::Result<Arc<R>> + Send + Sync + 'static,
    {
        self.register(key.into(), Arc::new(loader), priority, None);
    }

    /// Like [`register_loader`](Self::register_loader) with a static footprint estimate used
    /// until the resource has been measured once.
    pub fn register_loader_with_hint<F>(
        &self,
        key: impl Into<String>,
        loader: F,
        priority: u8,
        footprint_hint_bytes: u64,
    ) where
        F: Fn() -> anyhow::Result<Arc<R>> + Send + Sync + 'static,
    {
        self.register(key.into(), Arc::new(loader), priority, Some(footprint_hint_bytes));
    }

    fn register(&self, key: String, loader: Loader<R>, priority: u8, hint: Option<u64>) {
        let priority = if priority > MAX_PRIORITY {
            tracing::warn!(
                target: "strata.resources",
                key = %key,
                priority,
                "priority above {MAX_PRIORITY}; clamping"
            );
            MAX_PRIORITY
        } else {
            priority
        };

        let mut registry = self.inner.registry.lock();
        match registry.entries.get_mut(&key) {
            Some(entry) => {
                entry.loader = loader;
                entry.priority = priority;
                entry.footprint_hint = hint;
            }
            None => {
                registry.entries.insert(
                    key.clone(),
                    Entry {
                        loader,
                        priority,
                        footprint_hint: hint,
                        load_lock: Arc::new(Mutex::new(())),
                        loading: false,
                        loaded: None,
                        stats: EntryStats::default(),
                    },
                );
            }
        }
        tracing::debug!(
            target: "strata.resources",
            key = %key,
            priority,
            essential = is_essential(priority),
            "registered resource loader"
        );
    }

    /// Return the loaded instance, loading it first if needed (or if `force_reload`).
    ///
    /// Returns `None` for unregistered keys, when the load is not admitted under the budget,
    /// or when the loader fails or panics. Failures are not cached.
    pub fn get(&self, key: &str, force_reload: bool) -> Option<Arc<R>> {
        let load_lock = {
            let mut registry = self.inner.registry.lock();
            let Some(entry) = registry.entries.get_mut(key) else {
                tracing::debug!(target: "strata.resources", key, "no loader registered");
                return None;
            };
            if !force_reload {
                if let Some(instance) = entry.touch() {
                    return Some(instance);
                }
            }
            entry.load_lock.clone()
        };

        let _load_guard = load_lock.lock();
        if !force_reload {
            // Another caller may have finished loading while we waited.
            let mut registry = self.inner.registry.lock();
            if let Some(instance) = registry.entries.get_mut(key).and_then(Entry::touch) {
                return Some(instance);
            }
        }
        self.inner.load(key)
    }

    /// Drop the registry's reference to `key`.
    ///
    /// Essential resources are refused unless `force`. Returns `false` when nothing was
    /// unloaded.
    pub fn unload(&self, key: &str, force: bool) -> bool {
        let removed = {
            let mut registry = self.inner.registry.lock();
            let Some(entry) = registry.entries.get_mut(key) else {
                return false;
            };
            if entry.loaded.is_none() {
                return false;
            }
            if is_essential(entry.priority) && !force {
                tracing::warn!(
                    target: "strata.resources",
                    key,
                    priority = entry.priority,
                    "refusing to unload essential resource without force"
                );
                return false;
            }
            entry.loaded.take()
        };

        let Some(loaded) = removed else {
            return false;
        };
        let freed = loaded.footprint_bytes;
        drop(loaded);
        process::release_free_memory();
        tracing::info!(
            target: "strata.resources",
            key,
            freed = %format_bytes(freed),
            "unloaded resource"
        );
        true
    }

    /// Run one eviction pass in `mode`.
    pub fn reap(&self, mode: ReapMode) -> ReapReport {
        self.inner.reap(mode)
    }

    /// Start the background idle reaper. Does nothing if it is already running.
    pub fn start_reaper(&self) -> std::io::Result<()> {
        let mut reaper = self.reaper.lock();
        if reaper.as_ref().is_some_and(BackgroundLoop::is_running) {
            return Ok(());
        }
        let inner = self.inner.clone();
        let spawned = BackgroundLoop::spawn(
            "strata-reaper",
            self.inner.policy.reaper_interval,
            move || {
                inner.reap(ReapMode::Normal);
            },
        )?;
        *reaper = Some(spawned);
        tracing::info!(
            target: "strata.resources",
            interval_secs = self.inner.policy.reaper_interval.as_secs_f64(),
            idle_threshold_secs = self.inner.policy.idle_threshold.as_secs_f64(),
            "resource reaper started"
        );
        Ok(())
    }

    /// Stop the reaper with a bounded join. Returns `false` if it had to be detached.
    pub fn stop_reaper(&self) -> bool {
        let Some(mut reaper) = self.reaper.lock().take() else {
            return true;
        };
        reaper.stop(self.inner.policy.join_timeout)
    }

    pub fn is_reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(BackgroundLoop::is_running)
    }

    /// Stop the reaper, then unload everything, essential resources included.
    pub fn shutdown(&self) -> ReapReport {
        let stopped = self.stop_reaper();
        if !stopped {
            tracing::warn!(target: "strata.resources", "reaper did not stop in time; detached");
        }
        let report = self.inner.reap(ReapMode::Emergency);
        tracing::info!(
            target: "strata.resources",
            unloaded = report.unloaded.len(),
            freed = %format_bytes(report.freed_bytes),
            "resource manager shut down"
        );
        report
    }

    /// Load every registered essential resource. Returns the keys that are loaded afterwards.
    pub fn preload_essential(&self) -> Vec<String> {
        let mut keys: Vec<(u8, String)> = {
            let registry = self.inner.registry.lock();
            registry
                .entries
                .iter()
                .filter(|(_, entry)| is_essential(entry.priority))
                .map(|(key, entry)| (entry.priority, key.clone()))
                .collect()
        };
        keys.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        keys.into_iter()
            .filter_map(|(_, key)| self.get(&key, false).map(|_| key))
            .collect()
    }

    pub fn state(&self, key: &str) -> ResourceState {
        let registry = self.inner.registry.lock();
        registry
            .entries
            .get(key)
            .map_or(ResourceState::Unloaded, Entry::state)
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.state(key) == ResourceState::Loaded
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        let registry = self.inner.registry.lock();
        let mut keys: Vec<String> = registry
            .entries
            .iter()
            .filter(|(_, entry)| entry.loaded.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn memory_metrics(&self) -> ResourceMemoryMetrics {
        let now = Instant::now();
        let resident_bytes = self.inner.probe.resident_bytes();
        let registry = self.inner.registry.lock();
        let used_bytes = registry.tracked_bytes();

        let mut resources: Vec<ResourceUsage> = registry
            .entries
            .iter()
            .map(|(key, entry)| ResourceUsage {
                key: key.clone(),
                state: entry.state(),
                priority: entry.priority,
                essential: is_essential(entry.priority),
                footprint_bytes: entry.loaded.as_ref().map(|loaded| loaded.footprint_bytes),
                last_measured_bytes: entry.stats.last_measured_bytes,
                access_count: entry.stats.access_count,
                load_count: entry.stats.load_count,
                failed_loads: entry.stats.failed_loads,
                idle_secs: entry
                    .stats
                    .last_access
                    .map(|at| now.saturating_duration_since(at).as_secs_f64()),
                avg_load_millis: (entry.stats.load_count > 0).then(|| {
                    entry.stats.total_load_time.as_secs_f64() * 1000.0
                        / entry.stats.load_count as f64
                }),
            })
            .collect();
        resources.sort_by(|a, b| a.key.cmp(&b.key));

        let budget = self.inner.policy.budget_bytes;
        ResourceMemoryMetrics {
            budget_bytes: budget,
            used_bytes,
            reserved_bytes: registry.reserved_bytes,
            usage_ratio: if budget == 0 {
                0.0
            } else {
                used_bytes as f64 / budget as f64
            },
            loaded_count: resources
                .iter()
                .filter(|usage| usage.state == ResourceState::Loaded)
                .count(),
            registered_count: resources.len(),
            resident_bytes,
            resources,
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        let metrics = self.memory_metrics();
        let policy = &self.inner.policy;
        let mut out = Vec::new();

        if metrics.usage_ratio > 0.9 {
            out.push(format!(
                "Resource memory is at {:.0}% of the {} budget; unload unused resources or raise the budget",
                metrics.usage_ratio * 100.0,
                format_bytes(metrics.budget_bytes)
            ));
        }

        if metrics.loaded_count > policy.max_loaded_hint {
            out.push(format!(
                "{} resources are loaded simultaneously (hint: {}); consider loading them on demand",
                metrics.loaded_count, policy.max_loaded_hint
            ));
        }

        let long_idle = policy.long_idle_threshold.as_secs_f64();
        for usage in &metrics.resources {
            if usage.state != ResourceState::Loaded {
                continue;
            }
            if let Some(idle) = usage.idle_secs.filter(|idle| *idle > long_idle) {
                out.push(format!(
                    "Resource '{}' has been idle for {:.0} minutes; consider unloading it",
                    usage.key,
                    idle / 60.0
                ));
            }
        }

        out
    }
}

impl<R: ?Sized + Send + Sync + 'static> Drop for ResourceManager<R> {
    fn drop(&mut self) {
        self.stop_reaper();
    }
}

impl<R: ?Sized + Send + Sync + 'static> std::fmt::Debug for ResourceManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("ResourceManager")
            .field("policy", &self.inner.policy)
            .field("registered", &registry.entries.len())
            .field("tracked_bytes", &registry.tracked_bytes())
            .finish()
    }
}

impl<R: ?Sized> Entry<R> {
    fn state(&self) -> ResourceState {
        if self.loaded.is_some() {
            ResourceState::Loaded
        } else if self.loading {
            ResourceState::Loading
        } else {
            ResourceState::Unloaded
        }
    }

    /// Record an access and return the instance, if loaded.
    fn touch(&mut self) -> Option<Arc<R>> {
        let instance = self.loaded.as_ref()?.instance.clone();
        self.stats.access_count += 1;
        self.stats.last_access = Some(Instant::now());
        Some(instance)
    }

    fn estimate(&self, policy: &ResourcePolicy) -> u64 {
        match (self.stats.last_measured_bytes, self.footprint_hint) {
            (Some(measured), _) => (measured as f64 * FOOTPRINT_SAFETY_FACTOR).ceil() as u64,
            (None, Some(hint)) => hint,
            (None, None) => policy.default_footprint_bytes,
        }
    }

    fn idle(&self, now: Instant) -> Duration {
        self.stats
            .last_access
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at))
    }
}

impl<R: ?Sized> Registry<R> {
    fn tracked_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter_map(|entry| entry.loaded.as_ref())
            .map(|loaded| loaded.footprint_bytes)
            .sum()
    }
}

enum Admission {
    Admitted,
    Short { bytes: u64, reason: &'static str },
}

impl<R: ?Sized + Send + Sync + 'static> Inner<R> {
    /// Load `key`. The caller holds the key's load lock.
    fn load(&self, key: &str) -> Option<Arc<R>> {
        let (loader, estimate) = {
            let mut registry = self.registry.lock();
            let entry = registry.entries.get_mut(key)?;
            if let Some(previous) = entry.loaded.take() {
                tracing::debug!(
                    target: "strata.resources",
                    key,
                    footprint = %format_bytes(previous.footprint_bytes),
                    "dropping loaded instance for reload"
                );
            }
            (entry.loader.clone(), entry.estimate(&self.policy))
        };

        if !self.reserve(key, estimate) {
            return None;
        }

        let resident_before = self.probe.resident_bytes();
        let started = Instant::now();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| loader()));
        let elapsed = started.elapsed();
        let resident_after = self.probe.resident_bytes();

        let mut registry = self.registry.lock();
        registry.reserved_bytes = registry.reserved_bytes.saturating_sub(estimate);
        let entry = registry.entries.get_mut(key)?;
        entry.loading = false;

        match result {
            Ok(Ok(instance)) => {
                // No visible growth (e.g. memory shared with another resource): track the
                // estimate but keep the last real measurement.
                let measured = match (resident_before, resident_after) {
                    (Some(before), Some(after)) if after > before => Some(after - before),
                    _ => None,
                };
                let footprint_bytes = measured.unwrap_or(estimate);
                let now = Instant::now();
                entry.loaded = Some(Loaded {
                    instance: instance.clone(),
                    footprint_bytes,
                });
                entry.stats.load_count += 1;
                entry.stats.access_count += 1;
                entry.stats.total_load_time += elapsed;
                if measured.is_some() {
                    entry.stats.last_measured_bytes = measured;
                }
                entry.stats.last_access = Some(now);
                entry.stats.last_load = Some(now);
                tracing::info!(
                    target: "strata.resources",
                    key,
                    footprint = %format_bytes(footprint_bytes),
                    measured = measured.is_some(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "loaded resource"
                );
                Some(instance)
            }
            Ok(Err(err)) => {
                entry.stats.failed_loads += 1;
                tracing::warn!(
                    target: "strata.resources",
                    key,
                    error = %err,
                    "resource loader failed"
                );
                None
            }
            Err(_) => {
                entry.stats.failed_loads += 1;
                tracing::warn!(target: "strata.resources", key, "resource loader panicked");
                None
            }
        }
    }

    /// Reserve `estimate` bytes for loading `key`, evicting once if needed.
    fn reserve(&self, key: &str, estimate: u64) -> bool {
        let available = self.probe.system_memory().map(|system| system.available_bytes);
        let mut registry = self.registry.lock();

        if let Admission::Short { bytes, reason } = self.admission(&registry, estimate, available) {
            tracing::debug!(
                target: "strata.resources",
                key,
                shortfall = %format_bytes(bytes),
                reason,
                "load not admitted; evicting"
            );
            let freed = self.evict_for(&mut registry, key, bytes);
            // Freed memory may not show up in the system figures immediately; credit it.
            let available = available.map(|bytes| bytes.saturating_add(freed));
            if let Admission::Short { bytes, reason } =
                self.admission(&registry, estimate, available)
            {
                tracing::warn!(
                    target: "strata.resources",
                    key,
                    estimate = %format_bytes(estimate),
                    shortfall = %format_bytes(bytes),
                    reason,
                    "refusing to load resource: not enough memory"
                );
                return false;
            }
        }

        registry.reserved_bytes = registry.reserved_bytes.saturating_add(estimate);
        if let Some(entry) = registry.entries.get_mut(key) {
            entry.loading = true;
        }
        true
    }

    fn admission(
        &self,
        registry: &Registry<R>,
        estimate: u64,
        available: Option<u64>,
    ) -> Admission {
        let committed = registry
            .tracked_bytes()
            .saturating_add(registry.reserved_bytes);
        let projected = committed.saturating_add(estimate);
        if projected > self.policy.budget_bytes {
            return Admission::Short {
                bytes: projected - self.policy.budget_bytes,
                reason: "budget",
            };
        }

        if let Some(available) = available {
            let allowance = (available as f64 * self.policy.system_memory_fraction) as u64;
            if estimate > allowance {
                return Admission::Short {
                    bytes: estimate - allowance,
                    reason: "system_memory",
                };
            }
        }
        Admission::Admitted
    }

    /// Unload non-essential resources, lowest priority then least recently used first, until
    /// at least `shortfall` bytes are freed. Returns the bytes freed.
    fn evict_for(&self, registry: &mut Registry<R>, requester: &str, shortfall: u64) -> u64 {
        let mut candidates: Vec<(u8, Option<Instant>, String)> = registry
            .entries
            .iter()
            .filter(|(key, entry)| {
                key.as_str() != requester && entry.loaded.is_some() && !is_essential(entry.priority)
            })
            .map(|(key, entry)| (entry.priority, entry.stats.last_access, key.clone()))
            .collect();
        candidates.sort();

        let mut freed = 0u64;
        let mut evicted = Vec::new();
        for (_, _, key) in candidates {
            if freed >= shortfall {
                break;
            }
            if let Some(loaded) = registry
                .entries
                .get_mut(&key)
                .and_then(|entry| entry.loaded.take())
            {
                freed = freed.saturating_add(loaded.footprint_bytes);
                evicted.push(key);
            }
        }

        if !evicted.is_empty() {
            process::release_free_memory();
            tracing::info!(
                target: "strata.resources",
                evicted = ?evicted,
                freed = %format_bytes(freed),
                "evicted resources to make room"
            );
        }
        freed
    }

    fn reap(&self, mode: ReapMode) -> ReapReport {
        let now = Instant::now();
        let threshold = self.policy.idle_threshold;
        let mut removed = Vec::new();
        {
            let mut registry = self.registry.lock();
            for (key, entry) in registry.entries.iter_mut() {
                if entry.loaded.is_none()
                    || !mode.selects(entry.priority, entry.idle(now), threshold)
                {
                    continue;
                }
                if let Some(loaded) = entry.loaded.take() {
                    removed.push((key.clone(), loaded));
                }
            }
        }

        let mut report = ReapReport::default();
        if removed.is_empty() {
            return report;
        }
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, loaded) in removed {
            report.freed_bytes = report.freed_bytes.saturating_add(loaded.footprint_bytes);
            report.unloaded.push(key);
        }
        process::release_free_memory();
        tracing::info!(
            target: "strata.resources",
            mode = mode.as_str(),
            unloaded = ?report.unloaded,
            freed = %format_bytes(report.freed_bytes),
            "reaped resources"
        );
        report
    }
}
