//! Failure classification.
//!
//! Typed [`FetchError`] variants map straight to a category. Opaque errors
//! are matched against a fixed substring table over their type name and
//! message. Severity defaults per category, but a message mentioning
//! "critical" or "fatal" is always critical.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FetchError;

// ============================================================================
// Category & Severity
// ============================================================================

/// What kind of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection, DNS, timeout or 5xx failures.
    Network,
    /// Malformed or unexpected payloads.
    Parsing,
    /// Local database failures.
    Storage,
    /// Filesystem failures.
    FileIo,
    /// Data that failed validation.
    Validation,
    /// Upstream throttling.
    RateLimit,
    /// Rejected credentials.
    Auth,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Returns the default severity for this category.
    pub fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Parsing | Self::Validation => ErrorSeverity::Low,
            Self::Network | Self::FileIo | Self::RateLimit | Self::Unknown => {
                ErrorSeverity::Medium
            }
            Self::Storage | Self::Auth => ErrorSeverity::High,
        }
    }

    /// Returns true if failures of this category are retried automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Parsing)
    }

    /// Returns the snake_case label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::FileIo => "file_io",
            Self::Validation => "validation",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Unknown => "unknown",
        }
    }

    /// Returns all categories.
    pub fn all() -> &'static [ErrorCategory] {
        &[
            Self::Network,
            Self::Parsing,
            Self::Storage,
            Self::FileIo,
            Self::Validation,
            Self::RateLimit,
            Self::Auth,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How bad a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Expected noise.
    Low,
    /// Worth a retry.
    Medium,
    /// Needs attention.
    High,
    /// Never retried.
    Critical,
}

impl ErrorSeverity {
    /// Returns the snake_case label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Substring table for opaque errors, checked in order.
///
/// Entries match either the full type path of the wrapped error (see
/// [`FetchError::opaque`]) or the text its `Display` impl produces.
const PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Network,
        &[
            "reqwest::",
            "hyper::",
            "error sending request",
            "connection refused",
            "connection reset",
            "connection closed",
            "broken pipe",
            "dns error",
            "timed out",
            "deadline has elapsed",
            "Timeout",
            "certificate",
        ],
    ),
    (
        ErrorCategory::Parsing,
        &[
            "serde_json::",
            "expected value",
            "EOF while parsing",
            "invalid type",
            "trailing characters",
            "key must be a string",
            "Utf8Error",
            "invalid utf-8",
            "ParseIntError",
            "ParseFloatError",
            "invalid digit",
        ],
    ),
    (
        ErrorCategory::Storage,
        &[
            "rusqlite::",
            "database is locked",
            "database table is locked",
            "SqliteFailure",
            "constraint failed",
            "no such table",
        ],
    ),
    (
        ErrorCategory::FileIo,
        &[
            "std::io::",
            "No such file or directory",
            "Permission denied",
            "No space left on device",
            "Read-only file system",
        ],
    ),
    (
        ErrorCategory::RateLimit,
        &["429", "Too Many Requests", "Rate limit exceeded", "Quota exceeded"],
    ),
    (
        ErrorCategory::Auth,
        &["401", "403", "Unauthorized", "Forbidden", "Authentication failed"],
    ),
    (ErrorCategory::Validation, &["ValidationError", "validation failed"]),
];

/// Result of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Failure category.
    pub category: ErrorCategory,
    /// Failure severity.
    pub severity: ErrorSeverity,
    /// Error type name.
    pub error_type: String,
    /// Error message.
    pub message: String,
}

/// Maps errors to a category and severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    /// Creates a classifier.
    pub fn new() -> Self {
        Self
    }

    /// Classifies a fetch error.
    pub fn classify(&self, error: &FetchError) -> Classification {
        let error_type = error.kind_name().to_string();
        let message = error.to_string();
        let category = error
            .category()
            .unwrap_or_else(|| self.category_from_text(&error_type, &message));
        let severity = self.severity_for(category, &message);

        Classification {
            category,
            severity,
            error_type,
            message,
        }
    }

    /// Matches a type name and message against the substring table.
    pub fn category_from_text(&self, error_type: &str, message: &str) -> ErrorCategory {
        PATTERNS
            .iter()
            .find(|(_, patterns)| {
                patterns
                    .iter()
                    .any(|p| error_type.contains(p) || message.contains(p))
            })
            .map_or(ErrorCategory::Unknown, |(category, _)| *category)
    }

    /// Returns the severity of a failure.
    pub fn severity_for(&self, category: ErrorCategory, message: &str) -> ErrorSeverity {
        let upper = message.to_uppercase();
        if upper.contains("CRITICAL") || upper.contains("FATAL") {
            ErrorSeverity::Critical
        } else {
            category.default_severity()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severities() {
        assert_eq!(ErrorCategory::Network.default_severity(), ErrorSeverity::Medium);
        assert_eq!(ErrorCategory::Parsing.default_severity(), ErrorSeverity::Low);
        assert_eq!(ErrorCategory::Storage.default_severity(), ErrorSeverity::High);
        assert_eq!(ErrorCategory::Auth.default_severity(), ErrorSeverity::High);
        assert_eq!(ErrorCategory::Unknown.default_severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_opaque_patterns() {
        let c = FailureClassifier::new();
        let cases = [
            ("reqwest::error::Error", "boom", ErrorCategory::Network),
            ("Wrapped", "error sending request for url", ErrorCategory::Network),
            ("Wrapped", "operation timed out", ErrorCategory::Network),
            ("serde_json::error::Error", "bad", ErrorCategory::Parsing),
            ("Wrapped", "expected value at line 1 column 1", ErrorCategory::Parsing),
            ("rusqlite::error::Error", "boom", ErrorCategory::Storage),
            ("Wrapped", "database is locked", ErrorCategory::Storage),
            ("Wrapped", "Permission denied (os error 13)", ErrorCategory::FileIo),
            ("Wrapped", "Too Many Requests", ErrorCategory::RateLimit),
            ("Wrapped", "status 403", ErrorCategory::Auth),
            ("ValidationError", "bad", ErrorCategory::Validation),
            ("Mystery", "nothing matches", ErrorCategory::Unknown),
        ];
        for (kind, message, expected) in cases {
            assert_eq!(c.category_from_text(kind, message), expected, "{kind}: {message}");
        }
    }

    #[test]
    fn test_table_order_wins() {
        // "Timeout" is a network pattern and is checked before the 429 pattern.
        let c = FailureClassifier::new();
        assert_eq!(c.category_from_text("Timeout", "429"), ErrorCategory::Network);
    }

    #[test]
    fn test_critical_marker_overrides_category() {
        let c = FailureClassifier::new();
        let err = FetchError::opaque_with("hyper::Error", "fatal: connection reset");
        let classified = c.classify(&err);
        assert_eq!(classified.category, ErrorCategory::Network);
        assert_eq!(classified.severity, ErrorSeverity::Critical);

        let err = FetchError::Parse("CRITICAL payload".into());
        assert_eq!(c.classify(&err).severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_wrapped_library_errors() {
        let c = FailureClassifier::new();

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let classified = c.classify(&FetchError::opaque(&json));
        assert_eq!(classified.category, ErrorCategory::Parsing);
        assert!(classified.category.is_retryable());

        let missing = std::fs::File::open("/nonexistent/fundwatch/records.json").unwrap_err();
        assert_eq!(c.classify(&FetchError::opaque(&missing)).category, ErrorCategory::FileIo);

        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(c.classify(&FetchError::opaque(&refused)).category, ErrorCategory::Network);
    }

    #[test]
    fn test_typed_errors_skip_table() {
        let c = FailureClassifier::new();
        let classified = c.classify(&FetchError::status(429, "https://x"));
        assert_eq!(classified.category, ErrorCategory::RateLimit);
        assert_eq!(classified.error_type, "Status");
    }

    #[test]
    fn test_retryable_categories() {
        let retryable: Vec<_> = ErrorCategory::all()
            .iter()
            .copied()
            .filter(|c| c.is_retryable())
            .collect();
        assert_eq!(
            retryable,
            vec![ErrorCategory::Network, ErrorCategory::Parsing, ErrorCategory::RateLimit]
        );
    }
}
