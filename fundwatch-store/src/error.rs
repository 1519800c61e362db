//! Store error types.

use thiserror::Error;

/// Errors that can occur in the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A settings key that does not exist.
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    /// A settings value that could not be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Parse failure.
        message: String,
    },
}

impl StoreError {
    /// Returns true if this is a transient error that might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }

    pub(crate) fn invalid(key: &str, message: impl std::fmt::Display) -> Self {
        StoreError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<StoreError> for fundwatch_core::CoreError {
    fn from(err: StoreError) -> Self {
        fundwatch_core::CoreError::Sink(err.to_string())
    }
}
