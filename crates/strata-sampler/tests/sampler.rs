use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{MemoryProbe, PressureCallback, Severity, SystemMemory};
use strata_sampler::{MemorySample, MemorySampler, SamplerPolicy, SamplerThresholds};

#[derive(Default)]
struct FakeProbe {
    resident: AtomicU64,
    reads: AtomicUsize,
}

impl FakeProbe {
    fn with_resident(bytes: u64) -> Self {
        let probe = Self::default();
        probe.resident.store(bytes, Ordering::SeqCst);
        probe
    }
}

impl MemoryProbe for FakeProbe {
    fn resident_bytes(&self) -> Option<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Some(self.resident.load(Ordering::SeqCst))
    }

    fn system_memory(&self) -> Option<SystemMemory> {
        Some(SystemMemory {
            total_bytes: 10_000,
            available_bytes: 500,
        })
    }

    fn thread_count(&self) -> Option<usize> {
        Some(4)
    }
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<(&'static str, Severity)>>>,
}

impl PressureCallback for Recorder {
    fn on_pressure(&self, severity: Severity) {
        self.log.lock().push((self.name, severity));
    }
}

fn policy() -> SamplerPolicy {
    SamplerPolicy {
        interval: Duration::from_millis(10),
        thresholds: SamplerThresholds {
            warning_bytes: 1_000,
            critical_bytes: 2_000,
        },
        history_len: 5,
        alert_history_len: 3,
        ..SamplerPolicy::default()
    }
}

#[test]
fn critical_sample_fans_out_to_callbacks_in_order() {
    let sampler = MemorySampler::with_probe(policy(), Arc::new(FakeProbe::default()));
    let log = Arc::new(Mutex::new(Vec::new()));
    sampler.register_callback(Arc::new(Recorder {
        name: "first",
        log: log.clone(),
    }));
    sampler.register_callback(Arc::new(Recorder {
        name: "second",
        log: log.clone(),
    }));

    let raised = sampler.process_sample(MemorySample::new(1, 2_500));
    assert_eq!(raised, Some(Severity::Critical));
    assert_eq!(
        *log.lock(),
        vec![("first", Severity::Critical), ("second", Severity::Critical)]
    );

    let alerts = sampler.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].resident_bytes, 2_500);
}

#[test]
fn panicking_callback_does_not_block_later_callbacks() {
    let sampler = MemorySampler::with_probe(policy(), Arc::new(FakeProbe::default()));
    let log = Arc::new(Mutex::new(Vec::new()));
    sampler.register_callback(Arc::new(|_severity: Severity| panic!("callback exploded")));
    sampler.register_callback(Arc::new(Recorder {
        name: "survivor",
        log: log.clone(),
    }));

    sampler.process_sample(MemorySample::new(1, 2_000));
    assert_eq!(*log.lock(), vec![("survivor", Severity::Critical)]);
}

#[test]
fn warning_band_and_level_triggering() {
    let sampler = MemorySampler::with_probe(policy(), Arc::new(FakeProbe::default()));
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    sampler.register_callback(Arc::new(move |severity: Severity| {
        assert_eq!(severity, Severity::Warning);
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    for ts in 0..4 {
        assert_eq!(
            sampler.process_sample(MemorySample::new(ts, 1_500)),
            Some(Severity::Warning)
        );
    }
    // Every sample above a threshold notifies again.
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    // Alert history is bounded.
    assert_eq!(sampler.alerts().len(), 3);
}

#[test]
fn sample_now_reads_the_probe() {
    let probe = Arc::new(FakeProbe::with_resident(1_200));
    let sampler = MemorySampler::with_probe(policy(), probe.clone());

    let sample = sampler.sample_now().expect("fake probe always reports");
    assert_eq!(sample.resident_bytes, 1_200);
    assert_eq!(sample.thread_count, Some(4));
    let used = sample.system_used_percent().expect("fake probe reports system memory");
    assert!((used - 95.0).abs() < 1e-9);
    let own = sample.resident_percent().expect("fake probe reports total memory");
    assert!((own - 12.0).abs() < 1e-9);
    assert_eq!(sampler.latest_sample(), Some(sample));
    let recs = sampler.recommendations();
    assert!(
        recs.iter().any(|r| r.contains("this process holds 12.0%")),
        "{recs:?}"
    );

    let metrics = sampler.metrics();
    assert!(!metrics.running);
    assert_eq!(metrics.samples_retained, 1);
    assert_eq!(metrics.alerts_retained, 1);

    let json = serde_json::to_value(&metrics).expect("metrics serialize");
    assert_eq!(json["latest"]["resident_bytes"], 1_200);
}

#[test]
fn recommendations_cover_thresholds_system_usage_and_growth() {
    let sampler = MemorySampler::with_probe(
        SamplerPolicy {
            history_len: 20,
            thread_ceiling: 2,
            ..policy()
        },
        Arc::new(FakeProbe::default()),
    );

    for ts in 0..10u64 {
        let mut sample = MemorySample::new(ts, 1_000 + ts * 200);
        sample.system = Some(SystemMemory {
            total_bytes: 100,
            available_bytes: 5,
        });
        sample.thread_count = Some(3);
        sampler.process_sample(sample);
    }

    let recs = sampler.recommendations();
    assert!(recs.iter().any(|r| r.contains("critical threshold")), "{recs:?}");
    assert!(recs.iter().any(|r| r.contains("System memory usage")), "{recs:?}");
    assert!(recs.iter().any(|r| r.contains("Thread count 3")), "{recs:?}");
    assert!(recs.iter().any(|r| r.contains("grew")), "{recs:?}");
}

#[test]
fn start_is_idempotent_and_stop_joins_the_loop() {
    let probe = Arc::new(FakeProbe::with_resident(10));
    let sampler = MemorySampler::with_probe(policy(), probe.clone());

    sampler.start().expect("spawn sampler");
    sampler.start().expect("second start is a no-op");
    assert!(sampler.is_running());

    let deadline = Instant::now() + Duration::from_secs(5);
    while sampler.samples().len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(sampler.samples().len() >= 2);

    assert!(sampler.stop());
    assert!(!sampler.is_running());
    assert!(sampler.stop());

    let reads = probe.reads.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.reads.load(Ordering::SeqCst), reads);
}

#[test]
fn force_reclaim_reports_before_and_after() {
    let sampler = MemorySampler::with_probe(policy(), Arc::new(FakeProbe::with_resident(4_096)));
    let report = sampler.force_reclaim();
    assert_eq!(report.resident_before, Some(4_096));
    assert_eq!(report.resident_after, Some(4_096));
    assert_eq!(report.freed_bytes, 0);
}
