//! Per-project acquisition: signed API path under recovery, then the
//! browser fallback for counters the API reported as zero.

use fundwatch_core::{FetchSource, ProjectRecord, ProjectSource};
use std::sync::Arc;
use tracing::{debug, info, warn};

use fundwatch_fetch::{
    BrowserBackend, ChromiumBackend, ErrorContext, FallbackBrowserFetcher, RecoveryCoordinator,
    WorkerId,
};

use crate::api::SignedRequestClient;

/// Fetches complete project records.
pub struct ProjectFetcher<B: BrowserBackend = ChromiumBackend> {
    client: Arc<SignedRequestClient>,
    recovery: Arc<RecoveryCoordinator>,
    fallback: Option<Arc<FallbackBrowserFetcher<B>>>,
}

impl<B: BrowserBackend> ProjectFetcher<B> {
    /// Creates a fetcher without a browser fallback.
    pub fn new(client: Arc<SignedRequestClient>, recovery: Arc<RecoveryCoordinator>) -> Self {
        Self {
            client,
            recovery,
            fallback: None,
        }
    }

    /// Enables the browser fallback for zero counters.
    pub fn with_fallback(mut self, fallback: Arc<FallbackBrowserFetcher<B>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the API client.
    pub fn client(&self) -> &Arc<SignedRequestClient> {
        &self.client
    }

    /// Returns the recovery coordinator.
    pub fn recovery(&self) -> &Arc<RecoveryCoordinator> {
        &self.recovery
    }

    /// Returns the browser fallback, if enabled.
    pub fn fallback(&self) -> Option<&Arc<FallbackBrowserFetcher<B>>> {
        self.fallback.as_ref()
    }

    /// Fetches one project on behalf of `worker`. Never fails.
    ///
    /// API failures go through the recovery pipeline; when it gives up the
    /// default record is returned. A successful API record whose counters are
    /// both zero gets a second opinion from the rendered page.
    pub async fn fetch(&self, worker: WorkerId, id: &str) -> ProjectRecord {
        let context = ErrorContext::new()
            .with("project_id", id)
            .with("worker", worker.to_string());

        let record = match self
            .recovery
            .run(&context, || self.client.try_project_data(id))
            .await
        {
            Ok(record) => record,
            Err(failure) => {
                warn!(id, %worker, error = %failure, "API path exhausted, using default record");
                return ProjectRecord::unknown(id);
            }
        };

        if record.source != FetchSource::Api || !record.has_zero_counters() {
            return record;
        }

        let Some(fallback) = &self.fallback else {
            return record;
        };

        debug!(id, %worker, "API reported zero counters, trying browser");
        let sample = fallback.fetch_counters(worker, id).await;
        if sample.is_zero() {
            record
        } else {
            info!(id, likes = sample.likes, comments = sample.comments, "Counters from browser");
            record.with_counters(sample)
        }
    }

    /// Releases the browser session of a worker.
    pub async fn release(&self, worker: WorkerId) {
        if let Some(fallback) = &self.fallback {
            fallback.release(worker).await;
        }
    }

    /// Closes browser sessions idle past their TTL.
    pub async fn purge_idle_sessions(&self) -> usize {
        match &self.fallback {
            Some(fallback) => fallback.registry().purge_idle().await,
            None => 0,
        }
    }

    /// Closes every browser session.
    pub async fn shutdown(&self) {
        if let Some(fallback) = &self.fallback {
            fallback.shutdown().await;
        }
    }
}

impl<B: BrowserBackend> ProjectSource for ProjectFetcher<B> {
    async fn fetch_project(&self, id: &str) -> ProjectRecord {
        self.fetch(WorkerId(0), id).await
    }
}
