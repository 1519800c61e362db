//! Trait definitions for FundWatch.
//!
//! These are the seams to the collaborators around the acquisition layer:
//! something that produces records and something that keeps them.

use crate::error::CoreError;
use crate::models::ProjectRecord;

/// Anything that can produce a project record for an id.
///
/// Implementations are fail-soft: a record is always returned, falling back
/// to [`ProjectRecord::unknown`] when nothing could be fetched.
pub trait ProjectSource: Send + Sync {
    /// Fetches a snapshot of the given project.
    fn fetch_project(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = ProjectRecord> + Send;
}

/// Storage collaborator that persists fetched records.
pub trait RecordSink: Send + Sync {
    /// Persists one record, replacing any earlier snapshot with the same id.
    fn store(
        &self,
        record: &ProjectRecord,
    ) -> impl std::future::Future<Output = Result<(), CoreError>> + Send;

    /// Flushes buffered records, if the sink buffers.
    fn flush(&self) -> impl std::future::Future<Output = Result<(), CoreError>> + Send {
        async { Ok(()) }
    }
}
