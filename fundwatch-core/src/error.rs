//! Core error types for `FundWatch`.

use thiserror::Error;

/// Core error type for `FundWatch` operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Project not found upstream.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid data from an upstream response.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record sink failed to persist a record.
    #[error("Sink error: {0}")]
    Sink(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}
