//! Retry-with-remediation combinator.
//!
//! [`RecoveryCoordinator::run`] wraps a no-argument async operation. Every
//! failure is classified, appended to a capped ring and, when the policy
//! allows it, remediated and retried after a jittered backoff. The retry
//! count accumulates over the whole chain, so a chain ends after at most
//! `max_retries` retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::classifier::{ErrorCategory, ErrorSeverity, FailureClassifier};
use crate::error::FetchError;

/// Maximum number of error records kept.
const MAX_HISTORY: usize = 1000;

/// Number of records included in a report.
const REPORT_RECENT: usize = 50;

/// Free space below which file-io recovery warns.
const MIN_FREE_BYTES: u64 = 1024 * 1024 * 1024;

// ============================================================================
// Policy
// ============================================================================

/// Retry limits, backoff and remediation pauses.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Maximum retries per call chain.
    pub max_retries: u32,
    /// Base backoff delay.
    pub base_delay: Duration,
    /// Backoff multiplier.
    pub backoff_factor: f64,
    /// Upper bound on any backoff delay.
    pub max_delay: Duration,
    /// Pause after resetting connections.
    pub network_pause: Duration,
    /// Pause when the database reports lock contention.
    pub storage_pause: Duration,
    /// Fixed part of the rate-limit pause.
    pub rate_limit_pause: Duration,
    /// Random extra added to the rate-limit pause, as (min, max).
    pub rate_limit_jitter: (Duration, Duration),
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            network_pause: Duration::from_secs(2),
            storage_pause: Duration::from_secs(5),
            rate_limit_pause: Duration::from_secs(30),
            rate_limit_jitter: (Duration::from_secs(10), Duration::from_secs(30)),
        }
    }
}

impl RecoveryPolicy {
    /// A policy with every pause and delay set to zero.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            network_pause: Duration::ZERO,
            storage_pause: Duration::ZERO,
            rate_limit_pause: Duration::ZERO,
            rate_limit_jitter: (Duration::ZERO, Duration::ZERO),
            ..Self::default()
        }
    }

    /// Sets the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns true if a failure may be retried.
    pub fn should_retry(&self, severity: ErrorSeverity, category: ErrorCategory, retry_count: u32) -> bool {
        if severity == ErrorSeverity::Critical || retry_count >= self.max_retries {
            return false;
        }
        category.is_retryable()
    }

    /// Backoff before retry `n` (0-based) with a fixed jitter fraction.
    pub fn delay_with_jitter(&self, n: u32, jitter: f64) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let base = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let delay = base + base * jitter;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Backoff before retry `n` with 10-30% random jitter.
    pub fn delay(&self, n: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.1..=0.3);
        self.delay_with_jitter(n, jitter)
    }

    fn rate_limit_wait(&self) -> Duration {
        let (lo, hi) = self.rate_limit_jitter;
        let extra = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        self.rate_limit_pause + extra
    }
}

// ============================================================================
// Remediation hooks
// ============================================================================

/// Components that can help recover from a failure.
///
/// Both hooks are best effort and must not fail.
#[async_trait]
pub trait Remediate: Send + Sync {
    /// Drops pooled connections so the next request reconnects.
    async fn reset_connections(&self) {}

    /// Releases memory and stale resources.
    async fn reclaim(&self) {}
}

// ============================================================================
// Records
// ============================================================================

/// Free-form key/value context attached to a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorContext(BTreeMap<String, String>);

impl ErrorContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key/value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the path the failing operation worked on, if any.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.get("file_path").map(PathBuf::from)
    }
}

/// One classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Sequence number, unique per coordinator.
    pub id: u64,
    /// Error type name.
    pub error_type: String,
    /// Error message.
    pub message: String,
    /// Failure category.
    pub category: ErrorCategory,
    /// Failure severity.
    pub severity: ErrorSeverity,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Retries already spent on this call chain.
    pub retry_count: u32,
    /// Whether a later retry succeeded.
    pub resolved: bool,
    /// Caller-supplied context.
    pub context: ErrorContext,
}

/// Aggregate error counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Failures recorded.
    pub total_errors: u64,
    /// Chains that succeeded after at least one failure.
    pub recovered_errors: u64,
    /// Chains that gave up after at least one retry.
    pub failed_recoveries: u64,
    /// Failures per category label.
    pub by_category: BTreeMap<String, u64>,
    /// Failures per severity label.
    pub by_severity: BTreeMap<String, u64>,
}

impl RecoveryStats {
    /// Recovered failures as a percentage of all failures.
    #[allow(clippy::cast_precision_loss)]
    pub fn recovery_rate(&self) -> f64 {
        if self.total_errors == 0 {
            0.0
        } else {
            self.recovered_errors as f64 / self.total_errors as f64 * 100.0
        }
    }
}

/// Snapshot for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Counters.
    #[serde(flatten)]
    pub stats: RecoveryStats,
    /// Recovered / total in percent.
    pub recovery_rate: f64,
    /// Most recent records, oldest first.
    pub recent_errors: Vec<ErrorRecord>,
}

/// Terminal failure of a call chain.
#[derive(Debug, Error)]
#[error(
    "{} ({}/{}) after {} retries: {}",
    .record.error_type,
    .record.category,
    .record.severity,
    .record.retry_count,
    .record.message
)]
pub struct RecoveryFailure {
    /// The final classified failure.
    pub record: ErrorRecord,
    /// The error that ended the chain.
    #[source]
    pub error: FetchError,
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Debug, Default)]
struct State {
    history: VecDeque<ErrorRecord>,
    stats: RecoveryStats,
    next_id: u64,
}

/// Classifies, records, remediates and retries failures.
pub struct RecoveryCoordinator {
    classifier: FailureClassifier,
    policy: RecoveryPolicy,
    remediators: Vec<Arc<dyn Remediate>>,
    state: Mutex<State>,
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("policy", &self.policy)
            .field("remediators", &self.remediators.len())
            .finish_non_exhaustive()
    }
}

impl Default for RecoveryCoordinator {
    fn default() -> Self {
        Self::new(RecoveryPolicy::default())
    }
}

impl RecoveryCoordinator {
    /// Creates a coordinator with the given policy.
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            classifier: FailureClassifier::new(),
            policy,
            remediators: Vec::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Registers a component that takes part in remediation.
    pub fn with_remediator(mut self, remediator: Arc<dyn Remediate>) -> Self {
        self.remediators.push(remediator);
        self
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Runs `operation`, retrying it through the recovery pipeline.
    ///
    /// Returns the first success, or the last classified failure once the
    /// policy refuses another retry.
    pub async fn run<T, F, Fut>(
        &self,
        context: &ErrorContext,
        mut operation: F,
    ) -> Result<T, RecoveryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut retry_count = 0u32;
        let mut last_record: Option<u64> = None;

        loop {
            match operation().await {
                Ok(value) => {
                    if let Some(id) = last_record {
                        self.mark_resolved(id).await;
                        info!(retries = retry_count, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let record = self.record(&error, context, retry_count).await;
                    last_record = Some(record.id);

                    if !self
                        .policy
                        .should_retry(record.severity, record.category, retry_count)
                    {
                        if retry_count > 0 {
                            self.state.lock().await.stats.failed_recoveries += 1;
                        }
                        warn!(
                            category = %record.category,
                            severity = %record.severity,
                            retries = retry_count,
                            error = %record.message,
                            "Giving up"
                        );
                        return Err(RecoveryFailure { record, error });
                    }

                    self.recover(&record).await;
                    let delay = self.policy.delay(retry_count);
                    retry_count += 1;
                    debug!(attempt = retry_count, delay_ms = delay.as_millis(), "Retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Records a failure that is reported but not retried.
    pub async fn report(&self, error: &FetchError, context: &ErrorContext) -> ErrorRecord {
        self.record(error, context, 0).await
    }

    async fn record(&self, error: &FetchError, context: &ErrorContext, retry_count: u32) -> ErrorRecord {
        let classified = self.classifier.classify(error);
        let mut state = self.state.lock().await;

        let record = ErrorRecord {
            id: state.next_id,
            error_type: classified.error_type,
            message: classified.message,
            category: classified.category,
            severity: classified.severity,
            timestamp: Utc::now(),
            retry_count,
            resolved: false,
            context: context.clone(),
        };
        state.next_id += 1;

        state.stats.total_errors += 1;
        *state
            .stats
            .by_category
            .entry(record.category.label().to_string())
            .or_insert(0) += 1;
        *state
            .stats
            .by_severity
            .entry(record.severity.label().to_string())
            .or_insert(0) += 1;

        state.history.push_back(record.clone());
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }
        drop(state);

        warn!(
            category = %record.category,
            severity = %record.severity,
            error_type = %record.error_type,
            retry_count,
            "{}",
            record.message
        );
        record
    }

    async fn mark_resolved(&self, id: u64) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.history.iter_mut().rev().find(|r| r.id == id) {
            record.resolved = true;
        }
        state.stats.recovered_errors += 1;
    }

    /// Runs the category-specific remediation for a failure.
    pub async fn recover(&self, record: &ErrorRecord) {
        match record.category {
            ErrorCategory::Network => {
                debug!("Resetting connections");
                for r in &self.remediators {
                    r.reset_connections().await;
                }
                tokio::time::sleep(self.policy.network_pause).await;
            }
            ErrorCategory::Storage => {
                let message = record.message.to_lowercase();
                if message.contains("sqlite_busy")
                    || message.contains("locked")
                    || message.contains("busy")
                {
                    debug!("Waiting for database lock");
                    tokio::time::sleep(self.policy.storage_pause).await;
                }
                for r in &self.remediators {
                    r.reclaim().await;
                }
            }
            ErrorCategory::RateLimit => {
                let wait = self.policy.rate_limit_wait();
                info!(wait_secs = wait.as_secs_f64(), "Rate limited, backing off");
                tokio::time::sleep(wait).await;
            }
            ErrorCategory::FileIo => {
                let path = record.context.file_path();
                check_disk_headroom(path.as_deref());
                if let Some(parent) = path.as_deref().and_then(Path::parent) {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        match tokio::fs::create_dir_all(parent).await {
                            Ok(()) => info!(path = %parent.display(), "Created missing directory"),
                            Err(e) => warn!(path = %parent.display(), error = %e, "Could not create directory"),
                        }
                    }
                }
            }
            ErrorCategory::Parsing
            | ErrorCategory::Validation
            | ErrorCategory::Auth
            | ErrorCategory::Unknown => {}
        }
    }

    /// Returns the counters.
    pub async fn stats(&self) -> RecoveryStats {
        self.state.lock().await.stats.clone()
    }

    /// Returns the counters, the recovery rate and the latest records.
    pub async fn error_report(&self) -> ErrorReport {
        let state = self.state.lock().await;
        let skip = state.history.len().saturating_sub(REPORT_RECENT);
        ErrorReport {
            stats: state.stats.clone(),
            recovery_rate: state.stats.recovery_rate(),
            recent_errors: state.history.iter().skip(skip).cloned().collect(),
        }
    }

    /// Returns up to `limit` of the latest records, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let state = self.state.lock().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Clears history and counters.
    pub async fn clear_history(&self) {
        let mut state = self.state.lock().await;
        state.history.clear();
        state.stats = RecoveryStats::default();
        info!("Cleared error history");
    }
}

#[allow(clippy::cast_precision_loss)]
fn check_disk_headroom(path: Option<&Path>) {
    let probe = path
        .and_then(|p| p.ancestors().find(|a| a.exists()))
        .unwrap_or_else(|| Path::new("."));
    match fs2::available_space(probe) {
        Ok(free) if free < MIN_FREE_BYTES => {
            warn!(
                path = %probe.display(),
                free_gb = free as f64 / (1024.0 * 1024.0 * 1024.0),
                "Low disk space"
            );
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, "Could not read free disk space"),
    }
}

// ============================================================================
// Tests
// ============================================================================
