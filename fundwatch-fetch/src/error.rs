//! Fetch error types.
//!
//! [`FetchError`] is the tagged error produced at every fallible boundary of
//! the acquisition layer. Each variant maps directly to an
//! [`ErrorCategory`]; only [`FetchError::Opaque`] still needs the substring
//! table in [`crate::recovery::FailureClassifier`].

use std::time::Duration;
use thiserror::Error;

use crate::recovery::ErrorCategory;

// ============================================================================
// Main Fetch Error
// ============================================================================

/// Error type for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limited by upstream.
    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after: Option<u64>,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Response body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response cache storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Headless browser error.
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] fundwatch_core::CoreError),

    /// The gateway gave up on a request.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// A third-party failure with no better type than its text.
    #[error("{kind}: {message}")]
    Opaque {
        /// Type path of the wrapped error.
        kind: String,
        /// Display text of the wrapped error.
        message: String,
    },
}

impl FetchError {
    /// Wraps an arbitrary error, keeping its full type path for classification.
    pub fn opaque<E: std::fmt::Display + ?Sized>(err: &E) -> Self {
        Self::Opaque {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }

    /// Builds an opaque error from an explicit kind and message.
    pub fn opaque_with(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Opaque {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Builds a status error.
    pub fn status(status: u16, url: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
        }
    }

    /// Returns the variant name, recorded as the error type.
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Http(_) => "Http",
            Self::Status { .. } => "Status",
            Self::Timeout(_) => "Timeout",
            Self::RateLimited { .. } => "RateLimited",
            Self::AuthenticationFailed(_) => "AuthenticationFailed",
            Self::Parse(_) => "Parse",
            Self::Json(_) => "Json",
            Self::Storage(_) => "Storage",
            Self::Io(_) => "Io",
            Self::Validation(_) => "Validation",
            Self::Browser(_) => "Browser",
            Self::Core(_) => "Core",
            Self::Unavailable(_) => "Unavailable",
            Self::Opaque { kind, .. } => kind,
        }
    }

    /// Returns the category of a typed error, `None` for opaque ones.
    pub fn category(&self) -> Option<ErrorCategory> {
        let category = match self {
            Self::Http(e) => {
                if e.is_decode() || e.is_body() {
                    ErrorCategory::Parsing
                } else if let Some(status) = e.status() {
                    category_for_status(status.as_u16())
                } else {
                    ErrorCategory::Network
                }
            }
            Self::Status { status, .. } => category_for_status(*status),
            Self::Timeout(_) | Self::Unavailable(_) => ErrorCategory::Network,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::AuthenticationFailed(_) => ErrorCategory::Auth,
            Self::Parse(_) | Self::Json(_) => ErrorCategory::Parsing,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Io(_) => ErrorCategory::FileIo,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Browser(e) => e.category(),
            Self::Core(e) => match e {
                fundwatch_core::CoreError::InvalidData(_)
                | fundwatch_core::CoreError::Serialization(_) => ErrorCategory::Parsing,
                fundwatch_core::CoreError::InvalidConfig(_) => ErrorCategory::Validation,
                fundwatch_core::CoreError::Sink(_) => ErrorCategory::Storage,
                _ => ErrorCategory::Unknown,
            },
            Self::Opaque { .. } => return None,
        };
        Some(category)
    }

    /// Returns true for errors that are worth retrying at the transport level.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Unavailable(_) => true,
            _ => false,
        }
    }
}

// 404 and every other status count as network failures, so they stay retryable.
fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimit,
        401 | 403 => ErrorCategory::Auth,
        _ => ErrorCategory::Network,
    }
}

// ============================================================================
// Browser Error
// ============================================================================

/// Error type for headless browser operations.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No Chromium binary could be located.
    #[error("Chromium not found: {0}")]
    NotFound(String),

    /// Browser process failed to start.
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// Page navigation failed.
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Failure text.
        message: String,
    },

    /// Navigation did not finish in time.
    #[error("Navigation timed out after {0:?}")]
    Timeout(Duration),

    /// Script evaluation failed.
    #[error("Script failed: {0}")]
    Script(String),

    /// The session was already closed.
    #[error("Browser session closed")]
    Closed,
}

impl BrowserError {
    /// Returns the failure category of this browser error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Navigation { .. } | Self::Timeout(_) => ErrorCategory::Network,
            Self::Script(_) => ErrorCategory::Parsing,
            Self::NotFound(_) => ErrorCategory::FileIo,
            Self::Launch(_) | Self::Closed => ErrorCategory::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories() {
        assert_eq!(
            FetchError::status(429, "u").category(),
            Some(ErrorCategory::RateLimit)
        );
        assert_eq!(FetchError::status(403, "u").category(), Some(ErrorCategory::Auth));
        assert_eq!(FetchError::status(502, "u").category(), Some(ErrorCategory::Network));
    }

    #[test]
    fn test_not_found_is_network() {
        let err = FetchError::status(404, "https://zhongchou.modian.com/item/0.html");
        assert_eq!(err.category(), Some(ErrorCategory::Network));
        assert!(err.category().is_some_and(ErrorCategory::is_retryable));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_opaque_keeps_type_name() {
        let err = std::fmt::Error;
        let wrapped = FetchError::opaque(&err);
        assert!(wrapped.kind_name().ends_with("fmt::Error"));
        assert_eq!(wrapped.category(), None);
    }

    #[test]
    fn test_io_is_file_io() {
        let err = FetchError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.category(), Some(ErrorCategory::FileIo));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient() {
        assert!(FetchError::status(503, "u").is_transient());
        assert!(!FetchError::status(404, "u").is_transient());
        assert!(FetchError::Timeout(30).is_transient());
        assert!(!FetchError::Parse("bad".into()).is_transient());
    }
}
