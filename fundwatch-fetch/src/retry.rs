//! Transport-level retry policy for the gateway.
//!
//! This is the inner retry layer: it only re-sends idempotent requests on
//! connection failures and a fixed set of statuses. Whole-operation retries
//! belong to [`crate::recovery::RecoveryCoordinator`].

use reqwest::{Method, StatusCode};
use std::time::Duration;

/// Statuses that trigger a transport retry.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry policy for idempotent HTTP requests.
#[derive(Debug, Clone)]
pub struct TransportRetry {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff factor; retry `n` waits `factor * 2^(n-1)` seconds.
    pub backoff_factor: f64,
    /// Upper bound for a single wait.
    pub max_delay: Duration,
}

impl TransportRetry {
    /// Creates a new policy with the given number of retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the backoff factor.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(0.0);
        self
    }

    /// Calculates the delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff_factor * 2f64.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Returns true if requests with this method may be re-sent.
    pub fn is_idempotent(method: &Method) -> bool {
        matches!(
            *method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
        )
    }

    /// Returns true if a response status should be retried.
    pub fn should_retry_status(&self, method: &Method, status: StatusCode) -> bool {
        Self::is_idempotent(method) && RETRY_STATUSES.contains(&status.as_u16())
    }

    /// Determines if a request error should be retried.
    pub fn should_retry_error(&self, method: &Method, error: &reqwest::Error) -> bool {
        Self::is_idempotent(method) && (error.is_connect() || error.is_timeout())
    }
}

impl Default for TransportRetry {
    fn default() -> Self {
        Self::new(3)
    }
}
