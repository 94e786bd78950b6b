//! Configuration for Strata.
//!
//! A [`StrataConfig`] is a flat TOML document with one section per component. Every field
//! has a default, so an empty file is a valid configuration. The `*_policy` methods convert
//! the user-facing shape into the policy types each component consumes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use strata_cache::{
    default_disk_dir, CachePolicy, DiskLocation, DiskTierPolicy, MemoryTierPolicy,
    SharedTierPolicy,
};
use strata_core::{GB, MB};
use strata_resources::ResourcePolicy;
use strata_sampler::{SamplerPolicy, SamplerThresholds};

/// A byte count that deserializes from either an integer or a human string such as
/// `"512MB"` or `"1.5GiB"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => strata_core::parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// `0` means "no expiry" for every `ttl_secs` field.
fn ttl_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    #[serde(default = "MemoryCacheConfig::default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub max_bytes: Option<ByteSize>,
    #[serde(default = "MemoryCacheConfig::default_ttl_secs")]
    pub ttl_secs: u64,
}

impl MemoryCacheConfig {
    fn default_max_entries() -> usize {
        1000
    }

    fn default_ttl_secs() -> u64 {
        3600
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Self::default_max_entries(),
            max_bytes: None,
            ttl_secs: Self::default_ttl_secs(),
        }
    }
}

/// Tier 2. Without a `url` the tier is disabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedCacheConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "SharedCacheConfig::default_ttl_secs")]
    pub ttl_secs: u64,
    /// Connect, read and write timeout for each call.
    #[serde(default = "SharedCacheConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl SharedCacheConfig {
    fn default_ttl_secs() -> u64 {
        24 * 60 * 60
    }

    fn default_timeout_ms() -> u64 {
        1000
    }
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl_secs: Self::default_ttl_secs(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskCacheConfig {
    #[serde(default = "DiskCacheConfig::default_enabled")]
    pub enabled: bool,
    /// Defaults to `<tmp>/strata-cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "DiskCacheConfig::default_max_bytes")]
    pub max_bytes: ByteSize,
    #[serde(default = "DiskCacheConfig::default_ttl_secs")]
    pub ttl_secs: u64,
}

impl DiskCacheConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_max_bytes() -> ByteSize {
        ByteSize(GB)
    }

    fn default_ttl_secs() -> u64 {
        7 * 24 * 60 * 60
    }
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            dir: None,
            max_bytes: Self::default_max_bytes(),
            ttl_secs: Self::default_ttl_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Prefix applied to every key.
    #[serde(default = "CacheConfig::default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub memory: MemoryCacheConfig,
    #[serde(default)]
    pub shared: SharedCacheConfig,
    #[serde(default)]
    pub disk: DiskCacheConfig,
}

impl CacheConfig {
    fn default_namespace() -> String {
        "strata".to_owned()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            memory: MemoryCacheConfig::default(),
            shared: SharedCacheConfig::default(),
            disk: DiskCacheConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesConfig {
    #[serde(default = "ResourcesConfig::default_budget_bytes")]
    pub budget_bytes: ByteSize,
    #[serde(default = "ResourcesConfig::default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    #[serde(default = "ResourcesConfig::default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    /// Share of available system memory one load may claim.
    #[serde(default = "ResourcesConfig::default_system_memory_fraction")]
    pub system_memory_fraction: f64,
    #[serde(default = "ResourcesConfig::default_footprint_bytes")]
    pub default_footprint_bytes: ByteSize,
    #[serde(default = "ResourcesConfig::default_max_loaded_hint")]
    pub max_loaded_hint: usize,
}

impl ResourcesConfig {
    fn default_budget_bytes() -> ByteSize {
        ByteSize(4 * GB)
    }

    fn default_idle_threshold_secs() -> u64 {
        30 * 60
    }

    fn default_reaper_interval_secs() -> u64 {
        60
    }

    fn default_system_memory_fraction() -> f64 {
        0.8
    }

    fn default_footprint_bytes() -> ByteSize {
        ByteSize(512 * MB)
    }

    fn default_max_loaded_hint() -> usize {
        5
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            budget_bytes: Self::default_budget_bytes(),
            idle_threshold_secs: Self::default_idle_threshold_secs(),
            reaper_interval_secs: Self::default_reaper_interval_secs(),
            system_memory_fraction: Self::default_system_memory_fraction(),
            default_footprint_bytes: Self::default_footprint_bytes(),
            max_loaded_hint: Self::default_max_loaded_hint(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerConfig {
    #[serde(default = "SamplerConfig::default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "SamplerConfig::default_warning_bytes")]
    pub warning_bytes: ByteSize,
    #[serde(default = "SamplerConfig::default_critical_bytes")]
    pub critical_bytes: ByteSize,
    #[serde(default = "SamplerConfig::default_history_len")]
    pub history_len: usize,
    #[serde(default = "SamplerConfig::default_alert_history_len")]
    pub alert_history_len: usize,
    #[serde(default = "SamplerConfig::default_thread_ceiling")]
    pub thread_ceiling: usize,
}

impl SamplerConfig {
    fn default_interval_secs() -> u64 {
        30
    }

    fn default_warning_bytes() -> ByteSize {
        ByteSize(2 * GB)
    }

    fn default_critical_bytes() -> ByteSize {
        ByteSize(3 * GB)
    }

    fn default_history_len() -> usize {
        100
    }

    fn default_alert_history_len() -> usize {
        50
    }

    fn default_thread_ceiling() -> usize {
        100
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            warning_bytes: Self::default_warning_bytes(),
            critical_bytes: Self::default_critical_bytes(),
            history_len: Self::default_history_len(),
            alert_history_len: Self::default_alert_history_len(),
            thread_ceiling: Self::default_thread_ceiling(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
    /// Append log lines to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level, with `RUST_LOG` merged on top when set.
    ///
    /// An unparsable combination falls back to `RUST_LOG` alone, then to the configured
    /// level, then to `info`.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

/// Top-level Strata configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.to_string())
    }
}

impl StrataConfig {
    /// Read, parse and validate a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(target: "strata.config", path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: StrataConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express. All problems are reported
    /// together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.cache.namespace.trim().is_empty() {
            problems.push("cache.namespace must not be empty".to_owned());
        }
        if self.cache.memory.max_entries == 0 {
            problems.push("cache.memory.max_entries must be greater than 0".to_owned());
        }
        if self.cache.memory.max_bytes == Some(ByteSize(0)) {
            problems.push("cache.memory.max_bytes must be greater than 0 when set".to_owned());
        }
        if self.cache.shared.timeout_ms == 0 {
            problems.push("cache.shared.timeout_ms must be greater than 0".to_owned());
        }
        if self.cache.disk.enabled && self.cache.disk.max_bytes.0 == 0 {
            problems.push("cache.disk.max_bytes must be greater than 0".to_owned());
        }

        if self.resources.budget_bytes.0 == 0 {
            problems.push("resources.budget_bytes must be greater than 0".to_owned());
        }
        if self.resources.reaper_interval_secs == 0 {
            problems.push("resources.reaper_interval_secs must be greater than 0".to_owned());
        }
        let fraction = self.resources.system_memory_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            problems.push(format!(
                "resources.system_memory_fraction must be in (0, 1], got {fraction}"
            ));
        }

        if self.sampler.interval_secs == 0 {
            problems.push("sampler.interval_secs must be greater than 0".to_owned());
        }
        if self.sampler.warning_bytes >= self.sampler.critical_bytes {
            problems.push(format!(
                "sampler.warning_bytes ({}) must be below sampler.critical_bytes ({})",
                self.sampler.warning_bytes.0, self.sampler.critical_bytes.0
            ));
        }
        if self.sampler.history_len == 0 {
            problems.push("sampler.history_len must be greater than 0".to_owned());
        }
        if self.sampler.alert_history_len == 0 {
            problems.push("sampler.alert_history_len must be greater than 0".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        let cache = &self.cache;
        let disk = cache.disk.enabled.then(|| DiskLocation {
            dir: cache.disk.dir.clone().unwrap_or_else(default_disk_dir),
            policy: DiskTierPolicy {
                max_bytes: cache.disk.max_bytes.0,
                ttl: ttl_from_secs(cache.disk.ttl_secs),
                ..DiskTierPolicy::default()
            },
        });

        CachePolicy {
            namespace: cache.namespace.clone(),
            memory: MemoryTierPolicy {
                max_entries: cache.memory.max_entries,
                max_bytes: cache.memory.max_bytes.map(ByteSize::as_u64),
                default_ttl: ttl_from_secs(cache.memory.ttl_secs),
            },
            shared: SharedTierPolicy {
                url: cache
                    .shared
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_owned),
                default_ttl: ttl_from_secs(cache.shared.ttl_secs),
                timeout: Duration::from_millis(cache.shared.timeout_ms),
                ..SharedTierPolicy::default()
            },
            disk,
        }
    }

    pub fn resource_policy(&self) -> ResourcePolicy {
        let resources = &self.resources;
        ResourcePolicy {
            budget_bytes: resources.budget_bytes.0,
            idle_threshold: Duration::from_secs(resources.idle_threshold_secs),
            reaper_interval: Duration::from_secs(resources.reaper_interval_secs),
            system_memory_fraction: resources.system_memory_fraction,
            default_footprint_bytes: resources.default_footprint_bytes.0,
            max_loaded_hint: resources.max_loaded_hint,
            ..ResourcePolicy::default()
        }
    }

    pub fn sampler_policy(&self) -> SamplerPolicy {
        let sampler = &self.sampler;
        SamplerPolicy {
            interval: Duration::from_secs(sampler.interval_secs),
            thresholds: SamplerThresholds {
                warning_bytes: sampler.warning_bytes.0,
                critical_bytes: sampler.critical_bytes.0,
            },
            history_len: sampler.history_len,
            alert_history_len: sampler.alert_history_len,
            thread_ceiling: sampler.thread_ceiling,
            ..SamplerPolicy::default()
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber described by `config`.
///
/// Safe to call more than once; only the first call has an effect, and a subscriber installed
/// by someone else is left alone.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;

    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let mut file_error = None;
        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| file_error = Some((path.clone(), err)))
                .ok()
        });

        let make_writer = match file {
            Some(file) => BoxMakeWriter::new(std::sync::Mutex::new(file)),
            // Test output capture only sees the stdlib print macros.
            None if cfg!(debug_assertions) => {
                BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
            }
            None => BoxMakeWriter::new(std::io::stderr),
        };

        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            if let Some((path, err)) = file_error {
                tracing::warn!(
                    target: "strata.config",
                    path = %path.display(),
                    error = %err,
                    "failed to open log file; logging to stderr"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_directives_are_forgiving_about_case_and_synonyms() {
        assert_eq!(LoggingConfig::normalize_level_directives(" WARNING "), "warn");
        assert_eq!(LoggingConfig::normalize_level_directives("Debug"), "debug");
        assert_eq!(LoggingConfig::normalize_level_directives(""), "info");
        assert_eq!(
            LoggingConfig::normalize_level_directives("strata.cache=trace,info"),
            "strata.cache=trace,info"
        );
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        assert_eq!(ttl_from_secs(0), None);
        assert_eq!(ttl_from_secs(5), Some(Duration::from_secs(5)));
    }
}
