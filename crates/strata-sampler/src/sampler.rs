use crate::policy::SamplerPolicy;
use crate::sample::{Alert, MemorySample, ReclaimReport, SampleError, SamplerMetrics};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    format_bytes, now_millis, process, BackgroundLoop, MemoryProbe, PressureCallback, Severity,
    SystemProbe,
};

/// Fraction of system memory in use above which a recommendation is emitted.
const SYSTEM_USAGE_RECOMMENDATION_PERCENT: f64 = 90.0;
/// Minimum retained samples before growth trends are reported.
const GROWTH_TREND_MIN_SAMPLES: usize = 10;
const GROWTH_TREND_RATIO: f64 = 1.5;

/// Background memory sampler.
///
/// Histories are written only by the sampling loop (or [`process_sample`]) and read through
/// snapshot copies, so metrics callers never observe a half-applied update.
///
/// [`process_sample`]: MemorySampler::process_sample
pub struct MemorySampler {
    inner: Arc<Inner>,
    worker: Mutex<Option<BackgroundLoop>>,
}

struct Inner {
    policy: SamplerPolicy,
    probe: Arc<dyn MemoryProbe>,
    callbacks: RwLock<Vec<Arc<dyn PressureCallback>>>,
    samples: Mutex<VecDeque<MemorySample>>,
    alerts: Mutex<VecDeque<Alert>>,
}

impl MemorySampler {
    pub fn new(policy: SamplerPolicy) -> Self {
        Self::with_probe(policy, Arc::new(SystemProbe::new()))
    }

    pub fn with_probe(policy: SamplerPolicy, probe: Arc<dyn MemoryProbe>) -> Self {
        let samples = VecDeque::with_capacity(policy.history_len.min(1024));
        let alerts = VecDeque::with_capacity(policy.alert_history_len.min(1024));
        Self {
            inner: Arc::new(Inner {
                policy,
                probe,
                callbacks: RwLock::new(Vec::new()),
                samples: Mutex::new(samples),
                alerts: Mutex::new(alerts),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &SamplerPolicy {
        &self.inner.policy
    }

    /// Start the sampling loop. Does nothing if it is already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(BackgroundLoop::is_running) {
            return Ok(());
        }

        let inner = self.inner.clone();
        let spawned = BackgroundLoop::spawn("strata-sampler", self.inner.policy.interval, move || {
            inner.tick();
        })?;
        *worker = Some(spawned);

        tracing::info!(
            target: "strata.sampler",
            interval_ms = self.inner.policy.interval.as_millis() as u64,
            warning = %format_bytes(self.inner.policy.thresholds.warning_bytes),
            critical = %format_bytes(self.inner.policy.thresholds.critical_bytes),
            "memory sampler started"
        );
        Ok(())
    }

    /// Stop the sampling loop, waiting at most the configured join timeout.
    ///
    /// Returns `false` if the loop had to be detached. Safe to call repeatedly.
    pub fn stop(&self) -> bool {
        let Some(mut worker) = self.worker.lock().take() else {
            return true;
        };
        let stopped = worker.stop(self.inner.policy.join_timeout);
        if stopped {
            tracing::info!(target: "strata.sampler", "memory sampler stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(BackgroundLoop::is_running)
    }

    /// Append a pressure callback. Callbacks run in registration order.
    pub fn register_callback(&self, callback: Arc<dyn PressureCallback>) {
        self.inner.callbacks.write().push(callback);
    }

    /// Take one sample right now and run the alerting logic on it.
    pub fn sample_now(&self) -> Result<MemorySample, SampleError> {
        let sample = self.inner.take_sample()?;
        self.inner.process_sample(sample.clone());
        Ok(sample)
    }

    /// Record an externally produced sample and run the alerting logic on it.
    ///
    /// Returns the severity that was raised, if any.
    pub fn process_sample(&self, sample: MemorySample) -> Option<Severity> {
        self.inner.process_sample(sample)
    }

    pub fn latest_sample(&self) -> Option<MemorySample> {
        self.inner.samples.lock().back().cloned()
    }

    pub fn samples(&self) -> Vec<MemorySample> {
        self.inner.samples.lock().iter().cloned().collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.alerts.lock().iter().cloned().collect()
    }

    pub fn metrics(&self) -> SamplerMetrics {
        let (latest, samples_retained) = {
            let samples = self.inner.samples.lock();
            (samples.back().cloned(), samples.len())
        };
        SamplerMetrics {
            running: self.is_running(),
            interval_secs: self.inner.policy.interval.as_secs_f64(),
            latest,
            thresholds: self.inner.policy.thresholds,
            samples_retained,
            alerts_retained: self.inner.alerts.lock().len(),
            callbacks: self.inner.callbacks.read().len(),
        }
    }

    /// Human-readable suggestions derived from the most recent sample.
    pub fn recommendations(&self) -> Vec<String> {
        let samples = self.samples();
        let Some(latest) = samples.last() else {
            return Vec::new();
        };

        let thresholds = self.inner.policy.thresholds;
        let mut out = Vec::new();
        if latest.resident_bytes >= thresholds.critical_bytes {
            out.push(format!(
                "Resident memory {} is above the critical threshold {}; unload idle resources and clear in-process caches",
                format_bytes(latest.resident_bytes),
                format_bytes(thresholds.critical_bytes)
            ));
        } else if latest.resident_bytes >= thresholds.warning_bytes {
            out.push(format!(
                "Resident memory {} is above the warning threshold {}; consider trimming caches",
                format_bytes(latest.resident_bytes),
                format_bytes(thresholds.warning_bytes)
            ));
        }

        if let Some(percent) = latest.system_used_percent() {
            if percent >= SYSTEM_USAGE_RECOMMENDATION_PERCENT {
                let share = latest
                    .resident_percent()
                    .map(|own| format!(" (this process holds {own:.1}%)"))
                    .unwrap_or_default();
                out.push(format!(
                    "System memory usage is {percent:.1}%{share}; the host is close to exhaustion"
                ));
            }
        }

        if let Some(threads) = latest.thread_count {
            if threads > self.inner.policy.thread_ceiling {
                out.push(format!(
                    "Thread count {threads} exceeds the ceiling of {}; check for leaked worker threads",
                    self.inner.policy.thread_ceiling
                ));
            }
        }

        if samples.len() >= GROWTH_TREND_MIN_SAMPLES {
            let first = samples[0].resident_bytes;
            if first > 0 && latest.resident_bytes as f64 >= first as f64 * GROWTH_TREND_RATIO {
                let growth = (latest.resident_bytes as f64 / first as f64 - 1.0) * 100.0;
                out.push(format!(
                    "Resident memory grew {growth:.0}% over the last {} samples; look for unbounded growth",
                    samples.len()
                ));
            }
        }

        out
    }

    /// Ask the allocator to return free pages to the OS and report the effect.
    pub fn force_reclaim(&self) -> ReclaimReport {
        let start = Instant::now();
        let resident_before = self.inner.probe.resident_bytes();
        let released = process::release_free_memory();
        let resident_after = self.inner.probe.resident_bytes();
        let freed_bytes = match (resident_before, resident_after) {
            (Some(before), Some(after)) => before.saturating_sub(after),
            _ => 0,
        };
        let report = ReclaimReport {
            resident_before,
            resident_after,
            freed_bytes,
            released,
            elapsed_micros: start.elapsed().as_micros() as u64,
        };
        tracing::debug!(
            target: "strata.sampler",
            freed_bytes = report.freed_bytes,
            released = report.released,
            elapsed_micros = report.elapsed_micros,
            "forced heap reclamation"
        );
        report
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MemorySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySampler")
            .field("policy", &self.inner.policy)
            .field("callbacks", &self.inner.callbacks.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn tick(&self) {
        match self.take_sample() {
            Ok(sample) => {
                self.process_sample(sample);
            }
            Err(err) => {
                tracing::warn!(
                    target: "strata.sampler",
                    error = %err,
                    "failed to sample memory; will retry next tick"
                );
            }
        }
    }

    fn take_sample(&self) -> Result<MemorySample, SampleError> {
        let resident_bytes = self
            .probe
            .resident_bytes()
            .ok_or(SampleError::ResidentUnavailable)?;
        Ok(MemorySample {
            timestamp_millis: now_millis(),
            resident_bytes,
            system: self.probe.system_memory(),
            thread_count: self.probe.thread_count(),
        })
    }

    fn process_sample(&self, sample: MemorySample) -> Option<Severity> {
        let resident_bytes = sample.resident_bytes;
        let timestamp_millis = sample.timestamp_millis;
        {
            let mut samples = self.samples.lock();
            samples.push_back(sample);
            while samples.len() > self.policy.history_len.max(1) {
                samples.pop_front();
            }
        }

        let severity = self.policy.thresholds.severity_for(resident_bytes)?;
        let threshold = match severity {
            Severity::Critical => self.policy.thresholds.critical_bytes,
            Severity::Warning => self.policy.thresholds.warning_bytes,
        };
        let alert = Alert {
            severity,
            timestamp_millis,
            message: format!(
                "{} memory pressure: resident {} >= threshold {}",
                severity,
                format_bytes(resident_bytes),
                format_bytes(threshold)
            ),
            resident_bytes,
        };
        match severity {
            Severity::Critical => {
                tracing::error!(target: "strata.sampler", resident_bytes, "{}", alert.message)
            }
            Severity::Warning => {
                tracing::warn!(target: "strata.sampler", resident_bytes, "{}", alert.message)
            }
        }
        {
            let mut alerts = self.alerts.lock();
            alerts.push_back(alert);
            while alerts.len() > self.policy.alert_history_len.max(1) {
                alerts.pop_front();
            }
        }

        self.notify(severity);
        Some(severity)
    }

    fn notify(&self, severity: Severity) {
        // Snapshot so callbacks can register further callbacks without deadlocking.
        let callbacks: Vec<Arc<dyn PressureCallback>> = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| callback.on_pressure(severity)));
            if result.is_err() {
                tracing::error!(
                    target: "strata.sampler",
                    callback = index,
                    severity = %severity,
                    "pressure callback panicked; continuing with remaining callbacks"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SamplerThresholds;

    fn policy(history_len: usize) -> SamplerPolicy {
        SamplerPolicy {
            thresholds: SamplerThresholds {
                warning_bytes: 1_000,
                critical_bytes: 2_000,
            },
            history_len,
            alert_history_len: 2,
            ..SamplerPolicy::default()
        }
    }

    #[test]
    fn histories_are_bounded() {
        let sampler = MemorySampler::new(policy(3));
        for i in 0..10u64 {
            sampler.process_sample(MemorySample::new(i, 5_000));
        }
        let samples = sampler.samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].timestamp_millis, 7);
        assert_eq!(sampler.alerts().len(), 2);
    }

    #[test]
    fn below_threshold_raises_nothing() {
        let sampler = MemorySampler::new(policy(10));
        assert_eq!(sampler.process_sample(MemorySample::new(1, 999)), None);
        assert!(sampler.alerts().is_empty());
        assert!(sampler.recommendations().is_empty());
    }
}
