use crate::tier::TierLevel;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent lookups averaged into [`CacheMetrics::avg_latency_micros`].
pub const LATENCY_WINDOW: usize = 1000;

/// Point-in-time cache counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub lookups: u64,
    pub memory_hits: u64,
    pub shared_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    /// `hits / lookups`, or `None` before the first lookup.
    pub hit_rate: Option<f64>,
    /// Mean lookup latency over the last [`LATENCY_WINDOW`] lookups.
    pub avg_latency_micros: f64,
    pub promotions: u64,
    pub evictions: u64,
    pub writes: u64,
    pub write_failures: u64,
}

impl CacheMetrics {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.shared_hits + self.disk_hits
    }
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    memory_hits: u64,
    shared_hits: u64,
    disk_hits: u64,
    misses: u64,
    promotions: u64,
    evictions: u64,
    writes: u64,
    write_failures: u64,
    latencies: VecDeque<u64>,
    latency_sum: u64,
}

impl MetricsRecorder {
    pub(crate) fn record_lookup(&mut self, hit: Option<TierLevel>, elapsed: Duration) {
        match hit {
            Some(TierLevel::Memory) => self.memory_hits += 1,
            Some(TierLevel::Shared) => self.shared_hits += 1,
            Some(TierLevel::Disk) => self.disk_hits += 1,
            None => self.misses += 1,
        }

        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        if self.latencies.len() == LATENCY_WINDOW {
            if let Some(oldest) = self.latencies.pop_front() {
                self.latency_sum -= oldest;
            }
        }
        self.latencies.push_back(micros);
        self.latency_sum += micros;
    }

    pub(crate) fn record_promotions(&mut self, count: u64) {
        self.promotions += count;
    }

    pub(crate) fn record_evictions(&mut self, count: u64) {
        self.evictions += count;
    }

    pub(crate) fn record_write(&mut self, accepted: bool) {
        if accepted {
            self.writes += 1;
        } else {
            self.write_failures += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> CacheMetrics {
        let hits = self.memory_hits + self.shared_hits + self.disk_hits;
        let lookups = hits + self.misses;
        CacheMetrics {
            lookups,
            memory_hits: self.memory_hits,
            shared_hits: self.shared_hits,
            disk_hits: self.disk_hits,
            misses: self.misses,
            hit_rate: (lookups > 0).then(|| hits as f64 / lookups as f64),
            avg_latency_micros: if self.latencies.is_empty() {
                0.0
            } else {
                self.latency_sum as f64 / self.latencies.len() as f64
            },
            promotions: self.promotions,
            evictions: self.evictions,
            writes: self.writes,
            write_failures: self.write_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_window_rolls() {
        let mut recorder = MetricsRecorder::default();
        for _ in 0..LATENCY_WINDOW {
            recorder.record_lookup(None, Duration::from_micros(10));
        }
        for _ in 0..LATENCY_WINDOW {
            recorder.record_lookup(Some(TierLevel::Memory), Duration::from_micros(30));
        }
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.avg_latency_micros, 30.0);
        assert_eq!(snapshot.lookups, 2 * LATENCY_WINDOW as u64);
        assert_eq!(snapshot.hit_rate, Some(0.5));
    }
}
