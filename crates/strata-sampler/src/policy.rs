use serde::{Deserialize, Serialize};
use strata_core::{Severity, DEFAULT_JOIN_TIMEOUT, GB};
use std::time::Duration;

/// Resident-memory thresholds, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerThresholds {
    pub warning_bytes: u64,
    pub critical_bytes: u64,
}

impl Default for SamplerThresholds {
    fn default() -> Self {
        Self {
            warning_bytes: 2 * GB,
            critical_bytes: 3 * GB,
        }
    }
}

impl SamplerThresholds {
    /// Severity for a resident-memory reading. Critical is checked first.
    pub fn severity_for(self, resident_bytes: u64) -> Option<Severity> {
        if resident_bytes >= self.critical_bytes {
            Some(Severity::Critical)
        } else if resident_bytes >= self.warning_bytes {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerPolicy {
    /// Time between samples.
    pub interval: Duration,
    pub thresholds: SamplerThresholds,
    /// Maximum number of samples kept in the ring buffer.
    pub history_len: usize,
    /// Maximum number of alerts kept for diagnostics.
    pub alert_history_len: usize,
    /// Thread count above which a recommendation is emitted.
    pub thread_ceiling: usize,
    /// Upper bound on how long `stop()` waits for the loop.
    pub join_timeout: Duration,
}

impl Default for SamplerPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            thresholds: SamplerThresholds::default(),
            history_len: 100,
            alert_history_len: 50,
            thread_ceiling: 100,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_wins_over_warning() {
        let thresholds = SamplerThresholds {
            warning_bytes: 100,
            critical_bytes: 200,
        };
        assert_eq!(thresholds.severity_for(99), None);
        assert_eq!(thresholds.severity_for(100), Some(Severity::Warning));
        assert_eq!(thresholds.severity_for(199), Some(Severity::Warning));
        assert_eq!(thresholds.severity_for(200), Some(Severity::Critical));
        assert_eq!(thresholds.severity_for(u64::MAX), Some(Severity::Critical));
    }
}
