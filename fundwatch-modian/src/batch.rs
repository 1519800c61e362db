//! Pooled batch acquisition.
//!
//! Workers pull ids from a shared queue, pause a random delay between items
//! and hand every record to a [`RecordSink`]. The pool is sized from the
//! concurrency limit at start. Before each item a worker re-reads the shared
//! configuration: delay bounds and the reclaim epoch apply from the next
//! item, and a worker whose index is at or above a lowered limit puts its
//! item back and retires. Raising the limit mid-run does not add workers.

use fundwatch_core::{FetchSource, RecordSink};
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fundwatch_fetch::{BrowserBackend, ChromiumBackend, WorkerId};
use fundwatch_store::SharedConfig;

use crate::fetcher::ProjectFetcher;

/// Granularity of stop-aware sleeps.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Summary of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Ids fetched.
    pub processed: usize,
    /// Records that came back from upstream.
    pub succeeded: usize,
    /// Records whose counters came from the browser.
    pub fallback_used: usize,
    /// Ids that fell back to the default record.
    pub defaulted: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// True if the stop flag ended the run early.
    pub stopped: bool,
}

#[derive(Debug, Default)]
struct Tally {
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    fallback_used: AtomicUsize,
    defaulted: AtomicUsize,
}

/// Runs a fetcher over many ids with a bounded worker pool.
pub struct BatchRunner<B: BrowserBackend = ChromiumBackend> {
    fetcher: Arc<ProjectFetcher<B>>,
    config: SharedConfig,
    stop: Arc<AtomicBool>,
    reclaimed_epoch: AtomicU64,
}

impl<B: BrowserBackend> BatchRunner<B> {
    /// Creates a runner reading its knobs from `config`.
    pub fn new(fetcher: Arc<ProjectFetcher<B>>, config: SharedConfig) -> Self {
        let epoch = config.snapshot().reclaim_epoch;
        Self {
            fetcher,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            reclaimed_epoch: AtomicU64::new(epoch),
        }
    }

    /// Uses an externally owned stop flag.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Returns the stop flag.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Asks every worker to finish after its current item.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Returns true once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Last reclaim epoch acted upon.
    pub fn reclaimed_epoch(&self) -> u64 {
        self.reclaimed_epoch.load(Ordering::SeqCst)
    }

    /// Fetches every id and stores the records in `sink`.
    pub async fn run<S: RecordSink>(&self, ids: Vec<String>, sink: &S) -> BatchReport {
        let started = Instant::now();
        let total = ids.len();
        let workers = self
            .config
            .snapshot()
            .max_concurrent_requests
            .clamp(1, total.max(1));

        info!(ids = total, workers, "Starting batch");

        let queue = Mutex::new(ids.into_iter().collect::<VecDeque<_>>());
        let tally = Tally::default();

        join_all((0..workers).map(|n| self.worker(WorkerId(n), &queue, &tally, sink))).await;

        if let Err(e) = sink.flush().await {
            warn!(error = %e, "Failed to flush records");
        }

        let report = BatchReport {
            processed: tally.processed.load(Ordering::SeqCst),
            succeeded: tally.succeeded.load(Ordering::SeqCst),
            fallback_used: tally.fallback_used.load(Ordering::SeqCst),
            defaulted: tally.defaulted.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
            stopped: self.is_stopped(),
        };
        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            fallback_used = report.fallback_used,
            defaulted = report.defaulted,
            elapsed_secs = report.elapsed.as_secs_f64(),
            stopped = report.stopped,
            "Batch finished"
        );
        report
    }

    async fn worker<S: RecordSink>(
        &self,
        worker: WorkerId,
        queue: &Mutex<VecDeque<String>>,
        tally: &Tally,
        sink: &S,
    ) {
        let mut config = self.config.subscribe();
        let mut first = true;

        loop {
            let Some(id) = queue.lock().await.pop_front() else {
                break;
            };

            if !first {
                let delay = config.borrow().normalized_delay();
                self.pause(delay).await;
            }
            first = false;

            if self.is_stopped() {
                debug!(%worker, "Stop requested");
                break;
            }

            let current = config.borrow_and_update().clone();
            let limit = current.max_concurrent_requests.max(1);
            if worker.0 >= limit {
                queue.lock().await.push_front(id);
                info!(%worker, limit, "Worker retired after concurrency cut");
                break;
            }

            self.reclaim_if_advanced(current.reclaim_epoch).await;

            let record = self.fetcher.fetch(worker, &id).await;
            tally.processed.fetch_add(1, Ordering::SeqCst);
            if record.is_default() {
                tally.defaulted.fetch_add(1, Ordering::SeqCst);
            } else {
                tally.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            if record.source == FetchSource::Browser {
                tally.fallback_used.fetch_add(1, Ordering::SeqCst);
            }

            if let Err(e) = sink.store(&record).await {
                warn!(id, error = %e, "Failed to store record");
            }
        }

        self.fetcher.release(worker).await;
    }

    /// Frees caches and idle sessions once per epoch bump.
    async fn reclaim_if_advanced(&self, epoch: u64) {
        let previous = self.reclaimed_epoch.fetch_max(epoch, Ordering::SeqCst);
        if epoch <= previous {
            return;
        }

        let cache_rows = self.fetcher.client().gateway().reclaim();
        let sessions = self.fetcher.purge_idle_sessions().await;
        info!(epoch, cache_rows, sessions, "Reclaimed resources");
    }

    /// Sleeps a random delay within `bounds`, waking early on stop.
    async fn pause(&self, (lo, hi): (f64, f64)) {
        let secs = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        let deadline = Instant::now() + Duration::from_secs_f64(secs);

        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL_INTERVAL)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ClientConfig, SignedRequestClient};
    use crate::test_support::{CountingBackend, detail_body, mount_project, mount_slow_project};
    use fundwatch_core::{CoreError, CounterSample, ProjectRecord, RuntimeConfig};
    use fundwatch_fetch::{
        CachingHttpGateway, FallbackBrowserFetcher, FallbackConfig, GatewayConfig,
        RecoveryCoordinator, RecoveryPolicy, SessionRegistry, TransportRetry,
    };
    use std::sync::Mutex as StdMutex;
    use wiremock::MockServer;

    #[derive(Default)]
    struct CollectingSink {
        records: StdMutex<Vec<ProjectRecord>>,
        flushes: AtomicUsize,
    }

    impl RecordSink for CollectingSink {
        async fn store(&self, record: &ProjectRecord) -> Result<(), CoreError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn flush(&self) -> Result<(), CoreError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runner(server: &MockServer, workers: usize) -> BatchRunner<CountingBackend> {
        let gateway = CachingHttpGateway::new(
            GatewayConfig::default().with_retry(TransportRetry::no_retry()),
        )
        .unwrap();
        let client = SignedRequestClient::new(
            Arc::new(gateway),
            ClientConfig::default().with_web_base_url(server.uri()),
        );
        let recovery = RecoveryCoordinator::new(RecoveryPolicy::immediate().with_max_retries(1));

        let backend = Arc::new(CountingBackend::new(CounterSample::new(7, 1)));
        let fallback = FallbackBrowserFetcher::new(
            Arc::new(SessionRegistry::new(backend)),
            FallbackConfig::default()
                .with_attempts(1)
                .with_sample_interval(Duration::ZERO),
        );
        let fetcher = ProjectFetcher::new(Arc::new(client), Arc::new(recovery))
            .with_fallback(Arc::new(fallback));

        let config = SharedConfig::new(RuntimeConfig {
            max_concurrent_requests: workers,
            request_delay: (0.0, 0.0),
            reclaim_epoch: 0,
        });
        BatchRunner::new(Arc::new(fetcher), config)
    }

    #[tokio::test]
    async fn test_batch_report_counts() {
        let server = MockServer::start().await;
        mount_project(&server, "1", &detail_body("1", 3, 1)).await;
        mount_project(&server, "2", &detail_body("2", 4, 0)).await;
        mount_project(&server, "3", &detail_body("3", 0, 0)).await;

        let runner = runner(&server, 2);
        let sink = CollectingSink::default();
        let ids = ["1", "2", "3", "missing"].map(String::from).to_vec();
        let report = runner.run(ids, &sink).await;

        assert_eq!(report.processed, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.fallback_used, 1);
        assert_eq!(report.defaulted, 1);
        assert!(!report.stopped);
        assert_eq!(sink.flushes.load(Ordering::SeqCst), 1);

        let records = sink.records.lock().unwrap();
        let browser = records.iter().find(|r| r.id == "3").unwrap();
        assert_eq!(browser.counters(), CounterSample::new(7, 1));
        assert!(records.iter().find(|r| r.id == "missing").unwrap().is_default());
    }

    #[tokio::test]
    async fn test_stopped_before_start() {
        let server = MockServer::start().await;
        let runner = runner(&server, 3);
        runner.stop();

        let sink = CollectingSink::default();
        let report = runner.run(vec!["1".into(), "2".into()], &sink).await;

        assert_eq!(report.processed, 0);
        assert!(report.stopped);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let server = MockServer::start().await;
        let report = runner(&server, 4).run(Vec::new(), &CollectingSink::default()).await;
        assert_eq!(report, BatchReport { elapsed: report.elapsed, ..BatchReport::default() });
    }

    #[tokio::test]
    async fn test_epoch_bump_triggers_reclaim_once() {
        let server = MockServer::start().await;
        mount_project(&server, "1", &detail_body("1", 1, 1)).await;
        mount_project(&server, "2", &detail_body("2", 1, 1)).await;

        let runner = runner(&server, 2);
        runner.config.update(|c| RuntimeConfig {
            reclaim_epoch: c.reclaim_epoch + 1,
            ..c.clone()
        });

        let report = runner.run(vec!["1".into(), "2".into()], &CollectingSink::default()).await;
        assert_eq!(report.processed, 2);
        assert_eq!(runner.reclaimed_epoch(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_cut_retires_extra_workers() {
        let server = MockServer::start().await;
        let ids: Vec<String> = (1..=12).map(|n| n.to_string()).collect();
        for id in &ids {
            mount_slow_project(&server, id, &detail_body(id, 1, 1), Duration::from_millis(100))
                .await;
        }

        let runner = runner(&server, 4);
        let sink = CollectingSink::default();
        let cut = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            runner.config.update(|c| RuntimeConfig {
                max_concurrent_requests: 1,
                ..c.clone()
            });
        };
        let (report, ()) = tokio::join!(runner.run(ids, &sink), cut);

        // Four items were in flight at the cut; the other eight ran one at a time.
        assert_eq!(report.processed, 12);
        assert_eq!(sink.records.lock().unwrap().len(), 12);
        assert!(
            report.elapsed >= Duration::from_millis(800),
            "finished in {:?}",
            report.elapsed
        );
    }

    #[tokio::test]
    async fn test_records_land_in_json_store() {
        let server = MockServer::start().await;
        mount_project(&server, "1", &detail_body("1", 2, 2)).await;
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("records.json");

        let store = fundwatch_store::JsonRecordStore::open(&path).await;
        runner(&server, 1).run(vec!["1".into()], &store).await;

        let reopened = fundwatch_store::JsonRecordStore::open(&path).await;
        assert_eq!(reopened.get("1").await.unwrap().like_count, 2);
    }

    #[tokio::test]
    async fn test_pause_wakes_on_stop() {
        let server = MockServer::start().await;
        let runner = runner(&server, 1);
        runner.stop();

        let started = Instant::now();
        runner.pause((30.0, 30.0)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
