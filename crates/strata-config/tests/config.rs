use std::time::Duration;
use strata_config::{ByteSize, ConfigError, StrataConfig};
use strata_core::{GB, MB};

#[test]
fn empty_document_yields_defaults() {
    let config = StrataConfig::load_from_str("").unwrap();
    assert_eq!(config, StrataConfig::default());

    let cache = config.cache_policy();
    assert_eq!(cache.namespace, "strata");
    assert_eq!(cache.memory.max_entries, 1000);
    assert_eq!(cache.memory.default_ttl, Some(Duration::from_secs(3600)));
    assert_eq!(cache.shared.url, None);
    let disk = cache.disk.expect("disk tier enabled by default");
    assert_eq!(disk.dir, strata_cache::default_disk_dir());
    assert_eq!(disk.policy.max_bytes, GB);

    let resources = config.resource_policy();
    assert_eq!(resources.budget_bytes, 4 * GB);
    assert_eq!(resources.idle_threshold, Duration::from_secs(1800));
    assert_eq!(resources.default_footprint_bytes, 512 * MB);

    let sampler = config.sampler_policy();
    assert_eq!(sampler.interval, Duration::from_secs(30));
    assert_eq!(sampler.thresholds.warning_bytes, 2 * GB);
    assert_eq!(sampler.thresholds.critical_bytes, 3 * GB);
}

#[test]
fn full_document_maps_onto_component_policies() {
    let text = r#"
        [cache]
        namespace = "models"

        [cache.memory]
        max_entries = 10
        max_bytes = "64MB"
        ttl_secs = 0

        [cache.shared]
        url = "redis://127.0.0.1:6379"
        ttl_secs = 60
        timeout_ms = 250

        [cache.disk]
        enabled = true
        dir = "/var/cache/strata"
        max_bytes = 1048576
        ttl_secs = 120

        [resources]
        budget_bytes = "1.5GiB"
        idle_threshold_secs = 10
        reaper_interval_secs = 5
        system_memory_fraction = 0.5
        default_footprint_bytes = "128MB"
        max_loaded_hint = 3

        [sampler]
        interval_secs = 2
        warning_bytes = "100MB"
        critical_bytes = "200MB"
        history_len = 10
        alert_history_len = 5
        thread_ceiling = 16

        [logging]
        level = "debug"
        json = true
    "#;
    let config = StrataConfig::load_from_str(text).unwrap();
    assert_eq!(config.cache.memory.max_bytes, Some(ByteSize(64 * MB)));
    assert!(config.logging.json);

    let cache = config.cache_policy();
    assert_eq!(cache.namespace, "models");
    assert_eq!(cache.memory.max_bytes, Some(64 * MB));
    assert_eq!(cache.memory.default_ttl, None);
    assert_eq!(cache.shared.url.as_deref(), Some("redis://127.0.0.1:6379"));
    assert_eq!(cache.shared.timeout, Duration::from_millis(250));
    assert_eq!(cache.shared.default_ttl, Some(Duration::from_secs(60)));
    let disk = cache.disk.unwrap();
    assert_eq!(disk.dir, std::path::PathBuf::from("/var/cache/strata"));
    assert_eq!(disk.policy.max_bytes, 1_048_576);
    assert_eq!(disk.policy.ttl, Some(Duration::from_secs(120)));

    let resources = config.resource_policy();
    assert_eq!(resources.budget_bytes, 3 * GB / 2);
    assert_eq!(resources.reaper_interval, Duration::from_secs(5));
    assert_eq!(resources.system_memory_fraction, 0.5);
    assert_eq!(resources.max_loaded_hint, 3);

    let sampler = config.sampler_policy();
    assert_eq!(sampler.interval, Duration::from_secs(2));
    assert_eq!(sampler.thresholds.critical_bytes, 200 * MB);
    assert_eq!(sampler.history_len, 10);
    assert_eq!(sampler.alert_history_len, 5);
    assert_eq!(sampler.thread_ceiling, 16);
}

#[test]
fn disabled_disk_tier_has_no_location() {
    let config = StrataConfig::load_from_str("[cache.disk]\nenabled = false\n").unwrap();
    assert!(config.cache_policy().disk.is_none());
}

#[test]
fn blank_shared_url_disables_the_tier() {
    let config = StrataConfig::load_from_str("[cache.shared]\nurl = \"  \"\n").unwrap();
    assert_eq!(config.cache_policy().shared.url, None);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = StrataConfig::load_from_str("[cache.memory]\nmax_entires = 5\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
    assert!(err.to_string().contains("max_entires"), "{err}");

    let err = StrataConfig::load_from_str("[telemetry]\nenabled = true\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
}

#[test]
fn bad_byte_size_is_a_parse_error() {
    let err = StrataConfig::load_from_str("[resources]\nbudget_bytes = \"lots\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
}

#[test]
fn validation_reports_every_problem() {
    let text = r#"
        [cache.memory]
        max_entries = 0

        [resources]
        system_memory_fraction = 1.5

        [sampler]
        warning_bytes = "3GB"
        critical_bytes = "2GB"
    "#;
    let err = StrataConfig::load_from_str(text).unwrap_err();
    let ConfigError::Invalid(message) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(message.contains("cache.memory.max_entries"), "{message}");
    assert!(message.contains("system_memory_fraction"), "{message}");
    assert!(message.contains("sampler.warning_bytes"), "{message}");
}

#[test]
fn fraction_bounds_are_exclusive_of_zero_inclusive_of_one() {
    let mut config = StrataConfig::default();
    config.resources.system_memory_fraction = 1.0;
    assert!(config.validate().is_ok());

    config.resources.system_memory_fraction = 0.0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    config.resources.system_memory_fraction = f64::NAN;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn load_from_path_reads_files_and_reports_missing_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.toml");
    std::fs::write(&path, "[sampler]\ninterval_secs = 7\n").unwrap();

    let config = StrataConfig::load_from_path(&path).unwrap();
    assert_eq!(config.sampler.interval_secs, 7);

    let missing = dir.path().join("missing.toml");
    let err = StrataConfig::load_from_path(&missing).unwrap_err();
    match err {
        ConfigError::Io { path, .. } => assert!(path.ends_with("missing.toml")),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn byte_sizes_serialize_as_plain_integers() {
    let config = StrataConfig::default();
    let text = toml::to_string(&config).unwrap();
    assert!(text.contains(&format!("budget_bytes = {}", 4 * GB)), "{text}");

    let reparsed = StrataConfig::load_from_str(&text).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn init_tracing_is_idempotent() {
    let logging = strata_config::LoggingConfig::default();
    strata_config::init_tracing(&logging);
    strata_config::init_tracing(&logging);
    tracing::info!(target: "strata.config", "tracing initialized twice");
}
