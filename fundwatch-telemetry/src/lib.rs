// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `FundWatch` Telemetry
//!
//! Resource monitoring and adaptive tuning.
//!
//! - [`TelemetryMonitor`] - Periodic samples, baseline, threshold alerts
//! - [`AdaptiveTuner`] - Tighten-only rules over [`fundwatch_core::RuntimeConfig`]
//! - [`SystemMetrics`] - `sysinfo`-backed [`MetricsSource`]
//! - [`FetchWorkload`] - Request counters from the gateway and recovery layer
//!
//! ## Usage
//!
//! ```ignore
//! use fundwatch_telemetry::{AdaptiveTuner, TelemetryMonitor, DEFAULT_MONITOR_INTERVAL};
//!
//! let monitor = TelemetryMonitor::system()?
//!     .with_workload(workload)
//!     .with_tuner(Arc::new(AdaptiveTuner::new()), shared_config);
//! monitor.run(DEFAULT_MONITOR_INTERVAL, stop).await;
//! ```

pub mod error;
pub mod metrics;
pub mod monitor;
pub mod tuner;
pub mod workload;

#[cfg(test)]
mod testing;

pub use error::TelemetryError;
pub use metrics::{MetricsSource, SystemMetrics, SystemSnapshot};
pub use monitor::{
    Alert, AlertKind, AlertThresholds, Baseline, DEFAULT_MONITOR_INTERVAL, PerformanceReport,
    PerformanceSample, RecentAverages, TelemetryMonitor,
};
pub use tuner::{AdaptiveTuner, RuleStatus, TuningAction, TuningReport, TuningRule, default_rules};
pub use workload::{FetchWorkload, WorkloadCounters, WorkloadSource};
