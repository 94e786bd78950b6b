//! Shared building blocks for Strata's memory-governance crates.
//!
//! This crate is intentionally small:
//! - [`Severity`] and [`PressureCallback`] describe the only coupling point between the
//!   sampler and the components that shed memory.
//! - [`MemoryProbe`] abstracts how resident/system memory is measured so tests can feed
//!   synthetic readings.
//! - [`BackgroundLoop`] is the cancellable, bounded-join worker used by the sampler and the
//!   resource reaper.

mod background;
mod bytes;
mod pressure;
mod probe;
pub mod process;
mod time;

pub use background::{BackgroundLoop, DEFAULT_JOIN_TIMEOUT};
pub use bytes::{format_bytes, parse_byte_size, GB, KB, MB};
pub use pressure::{PressureCallback, Severity};
pub use probe::{MemoryProbe, SystemMemory, SystemProbe};
pub use time::now_millis;
