//! Runtime configuration shared between the batch runner and the tuner.

use serde::{Deserialize, Serialize};

/// Default number of concurrent workers.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

/// Default delay bounds between requests, in seconds.
pub const DEFAULT_REQUEST_DELAY: (f64, f64) = (1.0, 3.0);

/// Tunable runtime knobs.
///
/// Instances are immutable snapshots. The tuner produces a new snapshot and
/// publishes it; readers see either the old or the new value, never a mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of concurrent fetch workers.
    pub max_concurrent_requests: usize,
    /// Lower and upper bound of the pause between requests, in seconds.
    pub request_delay: (f64, f64),
    /// Bumped whenever caches and idle sessions should be reclaimed.
    #[serde(default)]
    pub reclaim_epoch: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_delay: DEFAULT_REQUEST_DELAY,
            reclaim_epoch: 0,
        }
    }
}

impl RuntimeConfig {
    /// Clamps `self` so it is never looser than `previous`.
    ///
    /// Concurrency can only go down (never below 1), delay bounds can only
    /// grow and the reclaim epoch never goes backwards.
    pub fn tightened_from(&self, previous: &RuntimeConfig) -> RuntimeConfig {
        let lo = self.request_delay.0.max(previous.request_delay.0);
        let hi = self.request_delay.1.max(previous.request_delay.1).max(lo);
        RuntimeConfig {
            max_concurrent_requests: self
                .max_concurrent_requests
                .min(previous.max_concurrent_requests)
                .max(1),
            request_delay: (lo, hi),
            reclaim_epoch: self.reclaim_epoch.max(previous.reclaim_epoch),
        }
    }

    /// Returns the delay bounds with `lo <= hi` and no negative values.
    pub fn normalized_delay(&self) -> (f64, f64) {
        let lo = self.request_delay.0.max(0.0);
        let hi = self.request_delay.1.max(lo);
        (lo, hi)
    }
}
