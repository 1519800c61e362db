//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while sampling or tuning.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// System metrics could not be read.
    #[error("Metrics unavailable: {0}")]
    Metrics(String),

    /// A tuning rule was rejected.
    #[error("Invalid tuning rule: {0}")]
    InvalidRule(String),
}
