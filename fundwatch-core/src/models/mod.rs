//! Domain models for FundWatch.
//!
//! ## Submodules
//!
//! - [`project`] - Project snapshots and reward tiers
//! - [`counters`] - Rendered engagement counters
//! - [`runtime`] - Tunable runtime configuration

mod counters;
mod project;
mod runtime;

pub use counters::CounterSample;
pub use project::{FetchSource, ProjectRecord, RewardTier, UNKNOWN_STATUS, completion_rate};
pub use runtime::{DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_REQUEST_DELAY, RuntimeConfig};
