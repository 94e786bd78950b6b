//! Lifecycle management for heavyweight, lazily loaded resources.
//!
//! Callers register a loader and a priority per key; [`ResourceManager::get`] loads on first
//! use when the estimated footprint fits the budget (evicting lower-priority resources once
//! if it does not), and the idle reaper unloads what has not been used recently.
//!
//! Priorities run from 0 to [`MAX_PRIORITY`]. Resources above
//! [`ESSENTIAL_PRIORITY_CUTOFF`] are essential and survive idle and pressure-driven passes.

mod manager;
mod metrics;
mod policy;

pub use manager::{Loader, ResourceManager};
pub use metrics::{ReapReport, ResourceMemoryMetrics, ResourceUsage};
pub use policy::{
    is_essential, is_high_priority, ReapMode, ResourcePolicy, ResourceState,
    ESSENTIAL_PRIORITY_CUTOFF, FOOTPRINT_SAFETY_FACTOR, HIGH_PRIORITY, MAX_PRIORITY,
};
