use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a memory-pressure alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of memory-pressure notifications.
///
/// Implementations are invoked synchronously from the sampler thread, so they must not block
/// on network I/O. A panicking implementation is isolated by the caller.
pub trait PressureCallback: Send + Sync {
    fn on_pressure(&self, severity: Severity);
}

impl<F> PressureCallback for F
where
    F: Fn(Severity) + Send + Sync,
{
    fn on_pressure(&self, severity: Severity) {
        self(severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_pressure_callbacks() {
        let calls = AtomicUsize::new(0);
        let callback = |severity: Severity| {
            assert_eq!(severity, Severity::Critical);
            calls.fetch_add(1, Ordering::SeqCst);
        };
        callback.on_pressure(Severity::Critical);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn severity_serializes_as_snake_case() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        assert!(Severity::Warning < Severity::Critical);
    }
}
