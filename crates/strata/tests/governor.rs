use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata::cache::{CachePolicy, MemoryTierPolicy, TieredCache};
use strata::config::StrataConfig;
use strata::resources::{ResourceManager, ResourcePolicy, ResourceState};
use strata::sampler::{MemorySample, MemorySampler, SamplerPolicy, SamplerThresholds};
use strata::{GovernorError, MemoryGovernor, MemoryProbe, Severity, SystemMemory};

struct FakeProbe {
    resident: AtomicU64,
}

impl FakeProbe {
    fn new(resident: u64) -> Arc<Self> {
        Arc::new(Self {
            resident: AtomicU64::new(resident),
        })
    }
}

impl MemoryProbe for FakeProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.resident.load(Ordering::SeqCst))
    }

    fn system_memory(&self) -> Option<SystemMemory> {
        Some(SystemMemory {
            total_bytes: 1_000_000,
            available_bytes: 800_000,
        })
    }
}

struct Model;

fn governor() -> MemoryGovernor<Model> {
    let cache = TieredCache::new(CachePolicy {
        namespace: "governor-test".to_owned(),
        memory: MemoryTierPolicy {
            max_entries: 8,
            ..MemoryTierPolicy::default()
        },
        disk: None,
        ..CachePolicy::default()
    })
    .unwrap();

    let probe = FakeProbe::new(100);
    let resources = ResourceManager::with_probe(
        ResourcePolicy {
            budget_bytes: 10_000,
            default_footprint_bytes: 100,
            idle_threshold: Duration::ZERO,
            ..ResourcePolicy::default()
        },
        probe.clone(),
    );
    let sampler = MemorySampler::with_probe(
        SamplerPolicy {
            interval: Duration::from_millis(10),
            thresholds: SamplerThresholds {
                warning_bytes: 1_000,
                critical_bytes: 2_000,
            },
            ..SamplerPolicy::default()
        },
        probe,
    );

    MemoryGovernor::from_parts(Arc::new(cache), Arc::new(resources), sampler)
}

fn sample(resident_bytes: u64) -> MemorySample {
    MemorySample::new(strata_core::now_millis(), resident_bytes)
}

#[test]
fn pressure_alerts_shed_cache_entries_and_idle_resources() {
    let governor = governor();
    let cache = governor.cache();
    for i in 0..8 {
        let key = cache.key(&("entry", i)).unwrap();
        assert!(cache.set_all(&key, vec![i as u8; 16]));
    }
    assert_eq!(cache.memory_tier().len(), 8);

    let resources = governor.resources();
    resources.register_loader("low", || Ok(Arc::new(Model)), 3);
    resources.register_loader("high", || Ok(Arc::new(Model)), 7);
    resources.register_loader("core", || Ok(Arc::new(Model)), 9);
    for key in ["low", "high", "core"] {
        assert!(resources.get(key, false).is_some());
    }
    std::thread::sleep(Duration::from_millis(5));

    assert_eq!(governor.sampler().process_sample(sample(500)), None);
    assert_eq!(cache.memory_tier().len(), 8);
    assert_eq!(resources.loaded_keys().len(), 3);

    assert_eq!(
        governor.sampler().process_sample(sample(1_500)),
        Some(Severity::Warning)
    );
    assert_eq!(cache.memory_tier().len(), 6);
    assert_eq!(resources.state("low"), ResourceState::Unloaded);
    assert!(resources.is_loaded("high"));
    assert!(resources.is_loaded("core"));

    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(
        governor.sampler().process_sample(sample(2_500)),
        Some(Severity::Critical)
    );
    assert_eq!(cache.memory_tier().len(), 0);
    assert_eq!(resources.loaded_keys(), vec!["core".to_owned()]);

    // Tier 1 evictions are counted.
    assert_eq!(cache.metrics().evictions, 8);
}

#[test]
fn shutdown_unloads_essential_resources_but_keeps_cache_contents() {
    let governor = governor();
    governor
        .resources()
        .register_loader("core", || Ok(Arc::new(Model)), 10);
    assert_eq!(governor.resources().preload_essential(), vec!["core".to_owned()]);

    let key = governor.cache().key("kept").unwrap();
    governor.cache().set_all(&key, b"value".to_vec());

    governor.start().unwrap();
    assert!(governor.is_running());

    let report = governor.shutdown();
    assert_eq!(report.unloaded, vec!["core".to_owned()]);
    assert!(!governor.is_running());
    assert!(governor.cache().get(&key).is_some());
}

#[test]
fn report_covers_every_component() {
    let governor = governor();
    governor
        .resources()
        .register_loader_with_hint("ranker", || Ok(Arc::new(Model)), 7, 200);
    governor.resources().get("ranker", false).unwrap();
    governor.sampler().process_sample(sample(1_200));

    let report = governor.report();
    assert_eq!(report.cache.namespace, "governor-test");
    assert_eq!(report.cache_health, 100);
    assert_eq!(report.resources.loaded_count, 1);
    assert_eq!(report.sampler.samples_retained, 1);
    assert_eq!(report.sampler.callbacks, 1);
    assert!(
        report
            .recommendations
            .iter()
            .any(|line| line.contains("warning threshold")),
        "{:?}",
        report.recommendations
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["cache"]["namespace"], "governor-test");
    assert_eq!(json["resources"]["resources"][0]["key"], "ranker");
    assert_eq!(json["sampler"]["latest"]["resident_bytes"], 1_200);
}

#[test]
fn builds_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StrataConfig::default();
    config.cache.namespace = "from-config".to_owned();
    config.cache.disk.dir = Some(dir.path().join("cache"));
    config.sampler.interval_secs = 1;
    config.resources.reaper_interval_secs = 1;

    let governor: MemoryGovernor<Model> = MemoryGovernor::new(&config).unwrap();
    assert_eq!(governor.cache().namespace(), "from-config");
    assert!(governor.cache().disk_tier().is_some());
    assert!(!governor.cache().shared_tier().is_enabled());

    governor.start().unwrap();
    governor.start().unwrap();
    assert!(governor.sampler().is_running());
    assert!(governor.resources().is_reaper_running());
    governor.shutdown();
    assert!(!governor.is_running());
}

#[test]
fn invalid_config_is_rejected_before_anything_is_built() {
    let mut config = StrataConfig::default();
    config.sampler.warning_bytes = config.sampler.critical_bytes;

    let err = MemoryGovernor::<Model>::new(&config).err().unwrap();
    assert!(matches!(err, GovernorError::Config(_)), "{err}");
}

#[test]
fn trait_object_resources_are_supported() {
    trait Scorer: Send + Sync {
        fn score(&self, input: &str) -> usize;
    }

    struct LengthScorer;

    impl Scorer for LengthScorer {
        fn score(&self, input: &str) -> usize {
            input.len()
        }
    }

    let governor: MemoryGovernor<dyn Scorer> = MemoryGovernor::new(&StrataConfig {
        cache: strata::config::CacheConfig {
            disk: strata::config::DiskCacheConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        },
        ..StrataConfig::default()
    })
    .unwrap();
    governor.resources().register_loader(
        "scorer",
        || Ok(Arc::new(LengthScorer) as Arc<dyn Scorer>),
        5,
    );
    let scorer = governor.resources().get("scorer", false).unwrap();
    assert_eq!(scorer.score("strata"), 6);
}
