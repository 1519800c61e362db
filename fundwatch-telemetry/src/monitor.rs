//! Periodic resource and workload sampling with threshold alerts.
//!
//! The monitor combines a [`MetricsSource`] reading with the request
//! counters of a [`WorkloadSource`] into a [`PerformanceSample`], keeps a
//! bounded history, derives a baseline once enough samples exist and logs
//! threshold crossings. Alerts are observational; acting on a sample is the
//! job of the [`AdaptiveTuner`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use fundwatch_store::SharedConfig;

use crate::error::TelemetryError;
use crate::metrics::{MetricsSource, SystemMetrics, SystemSnapshot};
use crate::tuner::AdaptiveTuner;
use crate::workload::{WorkloadCounters, WorkloadSource};

/// Default sampling interval.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

const SAMPLE_HISTORY: usize = 1000;
const ALERT_HISTORY: usize = 100;
const BASELINE_SAMPLES: usize = 10;
const REPORT_WINDOW: usize = 10;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ============================================================================
// Samples
// ============================================================================

/// One combined reading of resources and workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Global CPU usage, 0-100.
    pub cpu_percent: f64,
    /// Used memory share, 0-100.
    pub memory_percent: f64,
    /// Resident memory of this process, in MiB.
    pub process_memory_mb: f64,
    /// Disk bytes read by this process, in MiB.
    pub disk_read_mb: f64,
    /// Disk bytes written by this process, in MiB.
    pub disk_written_mb: f64,
    /// Network bytes received, in MiB.
    pub net_received_mb: f64,
    /// Network bytes sent, in MiB.
    pub net_sent_mb: f64,
    /// Threads of this process.
    pub thread_count: usize,
    /// Requests per second since the previous sample.
    pub request_rate: f64,
    /// Smoothed response time, in seconds.
    pub avg_response_time: f64,
    /// Failures per request since the previous sample, in percent.
    pub error_rate: f64,
}

impl PerformanceSample {
    #[allow(clippy::cast_precision_loss)]
    fn from_parts(system: &SystemSnapshot, request_rate: f64, avg_response_time: f64, error_rate: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: system.cpu_percent,
            memory_percent: system.memory_percent,
            process_memory_mb: system.process_memory_bytes as f64 / BYTES_PER_MB,
            disk_read_mb: system.disk_read_bytes as f64 / BYTES_PER_MB,
            disk_written_mb: system.disk_written_bytes as f64 / BYTES_PER_MB,
            net_received_mb: system.net_received_bytes as f64 / BYTES_PER_MB,
            net_sent_mb: system.net_sent_bytes as f64 / BYTES_PER_MB,
            thread_count: system.thread_count,
            request_rate,
            avg_response_time,
            error_rate,
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Limits that raise an alert when exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// CPU usage, percent.
    pub cpu_percent: f64,
    /// Memory usage, percent.
    pub memory_percent: f64,
    /// Error rate, percent.
    pub error_rate: f64,
    /// Response time, seconds.
    pub response_time: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 85.0,
            error_rate: 10.0,
            response_time: 5.0,
        }
    }
}

/// Which threshold was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// CPU above its limit.
    HighCpu,
    /// Memory above its limit.
    HighMemory,
    /// Error rate above its limit.
    HighErrorRate,
    /// Response time above its limit.
    SlowResponse,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::HighCpu => "high_cpu",
            Self::HighMemory => "high_memory",
            Self::HighErrorRate => "high_error_rate",
            Self::SlowResponse => "slow_response",
        };
        f.write_str(label)
    }
}

/// A threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// When it was raised.
    pub timestamp: DateTime<Utc>,
    /// What crossed.
    pub kind: AlertKind,
    /// Observed value.
    pub value: f64,
    /// Limit it crossed.
    pub threshold: f64,
}

impl AlertThresholds {
    /// Returns an alert for every limit the sample exceeds.
    pub fn check(&self, sample: &PerformanceSample) -> Vec<Alert> {
        [
            (AlertKind::HighCpu, sample.cpu_percent, self.cpu_percent),
            (AlertKind::HighMemory, sample.memory_percent, self.memory_percent),
            (AlertKind::HighErrorRate, sample.error_rate, self.error_rate),
            (AlertKind::SlowResponse, sample.avg_response_time, self.response_time),
        ]
        .into_iter()
        .filter(|(_, value, threshold)| value > threshold)
        .map(|(kind, value, threshold)| Alert {
            timestamp: sample.timestamp,
            kind,
            value,
            threshold,
        })
        .collect()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Means over the first samples of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Mean CPU usage.
    pub cpu_percent: f64,
    /// Mean memory usage.
    pub memory_percent: f64,
    /// Mean response time.
    pub avg_response_time: f64,
    /// Mean request rate.
    pub request_rate: f64,
}

/// Means over the most recent samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentAverages {
    /// Mean CPU usage.
    pub cpu_percent: f64,
    /// Mean memory usage.
    pub memory_percent: f64,
    /// Mean response time.
    pub avg_response_time: f64,
}

/// Snapshot of the monitor for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Latest sample.
    pub current: Option<PerformanceSample>,
    /// Baseline, once established.
    pub baseline: Option<Baseline>,
    /// Means over the last samples.
    pub averages: Option<RecentAverages>,
    /// Most recent alerts.
    pub recent_alerts: Vec<Alert>,
    /// Samples in the history.
    pub samples: usize,
}

#[allow(clippy::cast_precision_loss)]
fn mean<'a>(samples: impl ExactSizeIterator<Item = &'a PerformanceSample>, f: impl Fn(&PerformanceSample) -> f64) -> f64 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    samples.map(f).sum::<f64>() / n as f64
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug, Default)]
struct MonitorState {
    history: VecDeque<PerformanceSample>,
    alerts: VecDeque<Alert>,
    baseline: Option<Baseline>,
    last_workload: Option<(Instant, WorkloadCounters)>,
}

/// Samples resources on an interval and raises alerts.
pub struct TelemetryMonitor<M: MetricsSource = SystemMetrics> {
    source: Mutex<M>,
    workload: Option<Arc<dyn WorkloadSource>>,
    thresholds: AlertThresholds,
    tuner: Option<(Arc<AdaptiveTuner>, SharedConfig)>,
    state: RwLock<MonitorState>,
}

impl TelemetryMonitor<SystemMetrics> {
    /// Creates a monitor reading the host through `sysinfo`.
    pub fn system() -> Result<Self, TelemetryError> {
        Ok(Self::new(SystemMetrics::new()?))
    }
}

impl<M: MetricsSource> TelemetryMonitor<M> {
    /// Creates a monitor over a metrics source.
    pub fn new(source: M) -> Self {
        Self {
            source: Mutex::new(source),
            workload: None,
            thresholds: AlertThresholds::default(),
            tuner: None,
            state: RwLock::new(MonitorState::default()),
        }
    }

    /// Adds request counters to every sample.
    pub fn with_workload(mut self, workload: Arc<dyn WorkloadSource>) -> Self {
        self.workload = Some(workload);
        self
    }

    /// Overrides the alert limits.
    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Feeds every sample taken by [`Self::run`] to a tuner.
    pub fn with_tuner(mut self, tuner: Arc<AdaptiveTuner>, config: SharedConfig) -> Self {
        self.tuner = Some((tuner, config));
        self
    }

    /// Takes one sample, records it and checks the alert limits.
    pub async fn sample_once(&self) -> Result<PerformanceSample, TelemetryError> {
        let system = self.source.lock().await.sample()?;
        let counters = match &self.workload {
            Some(workload) => Some(workload.counters().await),
            None => None,
        };

        let mut state = self.state.write().await;
        let now = Instant::now();

        let (request_rate, error_rate) = match (counters, state.last_workload) {
            (Some(current), Some((at, previous))) => rates(&previous, &current, now.duration_since(at)),
            _ => (0.0, 0.0),
        };
        if let Some(current) = counters {
            state.last_workload = Some((now, current));
        }

        let avg_response_time = counters.map_or(0.0, |c| c.avg_response_time);
        let sample = PerformanceSample::from_parts(&system, request_rate, avg_response_time, error_rate);

        for alert in self.thresholds.check(&sample) {
            warn!(
                kind = %alert.kind,
                value = alert.value,
                threshold = alert.threshold,
                "Performance alert"
            );
            state.alerts.push_back(alert);
            while state.alerts.len() > ALERT_HISTORY {
                state.alerts.pop_front();
            }
        }

        state.history.push_back(sample.clone());
        while state.history.len() > SAMPLE_HISTORY {
            state.history.pop_front();
        }

        if state.baseline.is_none() && state.history.len() >= BASELINE_SAMPLES {
            let first = || state.history.iter().take(BASELINE_SAMPLES);
            let baseline = Baseline {
                cpu_percent: mean(first(), |s| s.cpu_percent),
                memory_percent: mean(first(), |s| s.memory_percent),
                avg_response_time: mean(first(), |s| s.avg_response_time),
                request_rate: mean(first(), |s| s.request_rate),
            };
            info!(
                cpu = baseline.cpu_percent,
                memory = baseline.memory_percent,
                response_time = baseline.avg_response_time,
                request_rate = baseline.request_rate,
                "Performance baseline established"
            );
            state.baseline = Some(baseline);
        }

        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            request_rate = sample.request_rate,
            error_rate = sample.error_rate,
            "Performance sample"
        );
        Ok(sample)
    }

    /// Samples every `interval` until `stop` is set.
    pub async fn run(&self, interval: Duration, stop: Arc<AtomicBool>) {
        info!(interval_secs = interval.as_secs_f64(), "Starting monitor");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match self.sample_once().await {
                Ok(sample) => {
                    if let Some((tuner, config)) = &self.tuner {
                        tuner.apply_to(config, &sample).await;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to sample metrics"),
            }
        }
        info!("Monitor stopped");
    }

    /// Returns the latest sample.
    pub async fn latest(&self) -> Option<PerformanceSample> {
        self.state.read().await.history.back().cloned()
    }

    /// Returns the baseline, once established.
    pub async fn baseline(&self) -> Option<Baseline> {
        self.state.read().await.baseline
    }

    /// Returns up to `limit` of the most recent alerts, oldest first.
    pub async fn alerts(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.read().await;
        let skip = state.alerts.len().saturating_sub(limit);
        state.alerts.iter().skip(skip).cloned().collect()
    }

    /// Summarizes the current state.
    pub async fn performance_report(&self) -> PerformanceReport {
        let state = self.state.read().await;
        let skip = state.history.len().saturating_sub(REPORT_WINDOW);
        let recent = || state.history.iter().skip(skip);

        let averages = (!state.history.is_empty()).then(|| RecentAverages {
            cpu_percent: mean(recent(), |s| s.cpu_percent),
            memory_percent: mean(recent(), |s| s.memory_percent),
            avg_response_time: mean(recent(), |s| s.avg_response_time),
        });

        let alert_skip = state.alerts.len().saturating_sub(REPORT_WINDOW);
        PerformanceReport {
            current: state.history.back().cloned(),
            baseline: state.baseline,
            averages,
            recent_alerts: state.alerts.iter().skip(alert_skip).cloned().collect(),
            samples: state.history.len(),
        }
    }
}

/// Request rate per second and error rate in percent between two readings.
#[allow(clippy::cast_precision_loss)]
fn rates(previous: &WorkloadCounters, current: &WorkloadCounters, elapsed: Duration) -> (f64, f64) {
    let requests = current.requests.saturating_sub(previous.requests);
    let errors = current.errors.saturating_sub(previous.errors);
    let secs = elapsed.as_secs_f64();

    let request_rate = if secs > 0.0 { requests as f64 / secs } else { 0.0 };
    let error_rate = if requests > 0 {
        errors as f64 / requests as f64 * 100.0
    } else {
        0.0
    };
    (request_rate, error_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedWorkload, ScriptedMetrics, reading};

    #[tokio::test]
    async fn test_alerts_on_crossings() {
        let monitor = TelemetryMonitor::new(ScriptedMetrics::new(vec![
            reading(50.0, 50.0),
            reading(95.0, 90.0),
        ]));

        monitor.sample_once().await.unwrap();
        assert!(monitor.alerts(10).await.is_empty());

        monitor.sample_once().await.unwrap();
        let kinds: Vec<AlertKind> = monitor.alerts(10).await.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::HighCpu, AlertKind::HighMemory]);
    }

    #[tokio::test]
    async fn test_error_rate_from_deltas() {
        let workload = Arc::new(FixedWorkload::default());
        let monitor = TelemetryMonitor::new(ScriptedMetrics::new(vec![reading(10.0, 10.0)]))
            .with_workload(workload.clone());

        workload.set(100, 5, 0.4);
        let first = monitor.sample_once().await.unwrap();
        assert_eq!(first.error_rate, 0.0);
        assert_eq!(first.request_rate, 0.0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        workload.set(120, 9, 6.0);
        let second = monitor.sample_once().await.unwrap();

        assert!((second.error_rate - 20.0).abs() < 1e-9);
        assert!(second.request_rate > 0.0);
        assert!((second.avg_response_time - 6.0).abs() < f64::EPSILON);

        let kinds: Vec<AlertKind> = monitor.alerts(10).await.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::HighErrorRate, AlertKind::SlowResponse]);
    }

    #[tokio::test]
    async fn test_baseline_after_ten_samples() {
        let readings = (0..12).map(|i| reading(f64::from(i), 40.0)).collect();
        let monitor = TelemetryMonitor::new(ScriptedMetrics::new(readings));

        for _ in 0..9 {
            monitor.sample_once().await.unwrap();
        }
        assert!(monitor.baseline().await.is_none());

        monitor.sample_once().await.unwrap();
        let baseline = monitor.baseline().await.unwrap();
        assert!((baseline.cpu_percent - 4.5).abs() < 1e-9);
        assert!((baseline.memory_percent - 40.0).abs() < 1e-9);

        // Later samples do not move it.
        monitor.sample_once().await.unwrap();
        assert_eq!(monitor.baseline().await, Some(baseline));
    }

    #[tokio::test]
    async fn test_performance_report_window() {
        let readings = (0..15).map(|i| reading(f64::from(i), 20.0)).collect();
        let monitor = TelemetryMonitor::new(ScriptedMetrics::new(readings));
        for _ in 0..15 {
            monitor.sample_once().await.unwrap();
        }

        let report = monitor.performance_report().await;
        assert_eq!(report.samples, 15);
        assert!((report.current.unwrap().cpu_percent - 14.0).abs() < 1e-9);
        // Mean of 5..=14.
        assert!((report.averages.unwrap().cpu_percent - 9.5).abs() < 1e-9);
        assert!(report.baseline.is_some());
    }

    #[tokio::test]
    async fn test_empty_report() {
        let monitor = TelemetryMonitor::new(ScriptedMetrics::new(vec![]));
        let report = monitor.performance_report().await;
        assert_eq!(report.samples, 0);
        assert!(report.current.is_none());
        assert!(report.averages.is_none());
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let monitor = Arc::new(TelemetryMonitor::new(ScriptedMetrics::new(vec![reading(1.0, 1.0)])));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            let stop = Arc::clone(&stop);
            async move { monitor.run(Duration::from_millis(5), stop).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.store(true, Ordering::SeqCst);
        handle.await.unwrap();

        assert!(monitor.performance_report().await.samples >= 2);
    }

    #[test]
    fn test_rates_without_requests() {
        let counters = WorkloadCounters::default();
        assert_eq!(rates(&counters, &counters, Duration::from_secs(1)), (0.0, 0.0));
    }
}
