use std::sync::Arc;
use strata_cache::TieredCache;
use strata_core::{format_bytes, PressureCallback, Severity};
use strata_resources::{ReapMode, ResourceManager};

/// Tier 1 occupancy targeted on a warning.
pub const WARNING_TRIM_RATIO: f64 = 0.75;

/// Sheds memory when the sampler reports pressure.
///
/// - `Warning`: trim the in-process cache tier to [`WARNING_TRIM_RATIO`] of capacity and run
///   a normal reaper pass.
/// - `Critical`: clear the in-process cache tier and run an aggressive reaper pass.
///
/// Only in-process state is touched; the shared and disk tiers are left alone.
pub struct PressureRelief<R: ?Sized + Send + Sync + 'static> {
    cache: Arc<TieredCache>,
    resources: Arc<ResourceManager<R>>,
}

impl<R: ?Sized + Send + Sync + 'static> PressureRelief<R> {
    pub fn new(cache: Arc<TieredCache>, resources: Arc<ResourceManager<R>>) -> Self {
        Self { cache, resources }
    }
}

impl<R: ?Sized + Send + Sync + 'static> PressureCallback for PressureRelief<R> {
    fn on_pressure(&self, severity: Severity) {
        let (evicted, mode) = match severity {
            Severity::Warning => (
                self.cache.trim_fast_tier(WARNING_TRIM_RATIO),
                ReapMode::Normal,
            ),
            Severity::Critical => (self.cache.clear_fast_tier(), ReapMode::Aggressive),
        };
        let report = self.resources.reap(mode);

        tracing::info!(
            target: "strata.governor",
            %severity,
            cache_evicted = evicted,
            reap_mode = mode.as_str(),
            unloaded = report.unloaded.len(),
            freed = %format_bytes(report.freed_bytes),
            "pressure relief applied"
        );
    }
}
