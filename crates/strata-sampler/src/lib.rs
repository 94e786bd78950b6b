//! Periodic memory sampling and pressure alerts.
//!
//! [`MemorySampler`] owns a background loop that measures resident and system memory,
//! appends each reading to a bounded history, and fans out [`Severity`]-tagged
//! notifications to registered [`PressureCallback`]s whenever resident memory is above a
//! threshold. Alerting is level-triggered: every sample above a threshold notifies again.
//!
//! [`Severity`]: strata_core::Severity
//! [`PressureCallback`]: strata_core::PressureCallback

mod policy;
mod sample;
mod sampler;

pub use policy::{SamplerPolicy, SamplerThresholds};
pub use sample::{Alert, MemorySample, ReclaimReport, SampleError, SamplerMetrics};
pub use sampler::MemorySampler;
