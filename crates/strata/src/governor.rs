use crate::relief::PressureRelief;
use serde::Serialize;
use std::sync::Arc;
use strata_cache::{CacheError, CacheStats, TieredCache};
use strata_config::{ConfigError, StrataConfig};
use strata_resources::{ReapReport, ResourceManager, ResourceMemoryMetrics};
use strata_sampler::{MemorySampler, SamplerMetrics};

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build cache hierarchy: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Point-in-time view of every component.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GovernorReport {
    pub sampler: SamplerMetrics,
    pub cache: CacheStats,
    /// 0..=100, see [`TieredCache::health_score`].
    pub cache_health: u8,
    pub resources: ResourceMemoryMetrics,
    pub recommendations: Vec<String>,
}

/// Owns the cache hierarchy, the resource manager and the sampler, and connects the sampler's
/// alerts to [`PressureRelief`].
///
/// Constructing a governor does not start any thread; call [`start`](Self::start). Dropping it
/// stops both background loops.
pub struct MemoryGovernor<R: ?Sized + Send + Sync + 'static> {
    cache: Arc<TieredCache>,
    resources: Arc<ResourceManager<R>>,
    sampler: MemorySampler,
}

impl<R: ?Sized + Send + Sync + 'static> MemoryGovernor<R> {
    /// Validate `config` and build every component from it.
    pub fn new(config: &StrataConfig) -> Result<Self, GovernorError> {
        config.validate()?;
        let cache = TieredCache::new(config.cache_policy())?;
        let resources = ResourceManager::new(config.resource_policy());
        let sampler = MemorySampler::new(config.sampler_policy());
        Ok(Self::from_parts(
            Arc::new(cache),
            Arc::new(resources),
            sampler,
        ))
    }

    /// Wire already constructed components together.
    pub fn from_parts(
        cache: Arc<TieredCache>,
        resources: Arc<ResourceManager<R>>,
        sampler: MemorySampler,
    ) -> Self {
        sampler.register_callback(Arc::new(PressureRelief::new(
            cache.clone(),
            resources.clone(),
        )));
        Self {
            cache,
            resources,
            sampler,
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn resources(&self) -> &Arc<ResourceManager<R>> {
        &self.resources
    }

    pub fn sampler(&self) -> &MemorySampler {
        &self.sampler
    }

    /// Start the sampler and the idle reaper. Idempotent.
    pub fn start(&self) -> Result<(), GovernorError> {
        self.sampler
            .start()
            .map_err(|source| GovernorError::Spawn {
                thread: "sampler",
                source,
            })?;
        if let Err(source) = self.resources.start_reaper() {
            self.sampler.stop();
            return Err(GovernorError::Spawn {
                thread: "reaper",
                source,
            });
        }

        tracing::info!(
            target: "strata.governor",
            namespace = self.cache.namespace(),
            "memory governor started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_running() || self.resources.is_reaper_running()
    }

    /// Stop both loops and unload every resource, essential ones included. Cache contents are
    /// left in place.
    pub fn shutdown(&self) -> ReapReport {
        if !self.sampler.stop() {
            tracing::warn!(target: "strata.governor", "sampler did not stop in time; detached");
        }
        let report = self.resources.shutdown();
        tracing::info!(
            target: "strata.governor",
            unloaded = report.unloaded.len(),
            "memory governor shut down"
        );
        report
    }

    pub fn report(&self) -> GovernorReport {
        let mut recommendations = self.sampler.recommendations();
        recommendations.extend(self.resources.recommendations());
        GovernorReport {
            sampler: self.sampler.metrics(),
            cache: self.cache.stats(),
            cache_health: self.cache.health_score(),
            resources: self.resources.memory_metrics(),
            recommendations,
        }
    }
}
