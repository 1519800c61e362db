//! Failure classification and recovery.
//!
//! - [`FailureClassifier`] - Maps errors to a category and severity
//! - [`RecoveryCoordinator`] - Retry combinator with remediation and stats
//! - [`Remediate`] - Hooks other components expose to the coordinator

mod classifier;
mod coordinator;

pub use classifier::{Classification, ErrorCategory, ErrorSeverity, FailureClassifier};
pub use coordinator::{
    ErrorContext, ErrorRecord, ErrorReport, RecoveryCoordinator, RecoveryFailure, RecoveryPolicy,
    RecoveryStats, Remediate,
};
