//! Strata: memory governance for long-running, memory-hungry services.
//!
//! The three components live in their own crates and are re-exported here:
//!
//! - [`cache`]: a memory / shared / disk cache hierarchy with promotion and degradation.
//! - [`resources`]: lazily loaded, priority-ranked resources under a memory budget.
//! - [`sampler`]: periodic memory sampling with threshold alerts.
//!
//! [`MemoryGovernor`] builds all three from a [`config::StrataConfig`] and wires the sampler's
//! alerts to [`PressureRelief`], which sheds cache entries and idle resources.

mod governor;
mod relief;

pub use strata_cache as cache;
pub use strata_config as config;
pub use strata_resources as resources;
pub use strata_sampler as sampler;

pub use strata_core::{MemoryProbe, PressureCallback, Severity, SystemMemory};

pub use governor::{GovernorError, GovernorReport, MemoryGovernor};
pub use relief::{PressureRelief, WARNING_TRIM_RATIO};
