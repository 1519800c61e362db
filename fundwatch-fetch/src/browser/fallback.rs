//! Browser-rendered counter extraction.
//!
//! Used when the API returns a record whose likes and comments are both
//! zero. The page is loaded in the calling worker's own session, scrolled
//! so the counters mount, and sampled a few times. The first non-zero
//! sample wins.

use fundwatch_core::CounterSample;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{BrowserBackend, BrowserSession, SCROLL_SCRIPT, SessionRegistry, WorkerId};
use crate::error::BrowserError;

/// Project page location.
pub const DEFAULT_ITEM_URL_BASE: &str = "https://zhongchou.modian.com/item";

/// Granularity of stop-flag checks while waiting.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Sampling settings.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Maximum samples per project.
    pub attempts: u32,
    /// Wait between scrolling and reading.
    pub sample_interval: Duration,
    /// Page load limit.
    pub navigation_timeout: Duration,
    /// How long a result is reused.
    pub cache_ttl: Duration,
    /// Base URL of project pages.
    pub item_url_base: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            sample_interval: Duration::from_millis(500),
            navigation_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(30 * 60),
            item_url_base: DEFAULT_ITEM_URL_BASE.to_string(),
        }
    }
}

impl FallbackConfig {
    /// Sets the number of samples.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Sets the wait between scroll and read.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets the result cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the project page base URL.
    pub fn with_item_url_base(mut self, base: impl Into<String>) -> Self {
        self.item_url_base = base.into();
        self
    }
}

/// Reads rendered counters through per-worker browser sessions.
pub struct FallbackBrowserFetcher<B: BrowserBackend> {
    registry: Arc<SessionRegistry<B>>,
    config: FallbackConfig,
    stop: Arc<AtomicBool>,
    cache: Mutex<HashMap<String, (Instant, CounterSample)>>,
}

impl<B: BrowserBackend> FallbackBrowserFetcher<B> {
    /// Creates a fetcher over a session registry.
    pub fn new(registry: Arc<SessionRegistry<B>>, config: FallbackConfig) -> Self {
        Self {
            registry,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Shares an external stop flag.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Returns the stop flag.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Requests that in-flight work ends early.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Returns true once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry<B>> {
        &self.registry
    }

    /// Returns the project page URL.
    pub fn item_url(&self, project_id: &str) -> String {
        format!("{}/{project_id}.html", self.config.item_url_base.trim_end_matches('/'))
    }

    /// Reads the counters for one project.
    ///
    /// Never fails: errors and stops yield a zero sample.
    #[instrument(skip(self), fields(worker = %worker))]
    pub async fn fetch_counters(&self, worker: WorkerId, project_id: &str) -> CounterSample {
        if self.is_stopped() {
            return CounterSample::zero();
        }

        if let Some(hit) = self.cached(project_id).await {
            debug!("Counter cache hit");
            return hit;
        }

        match self.sample(worker, project_id).await {
            Some(sample) => {
                self.remember(project_id, sample).await;
                sample
            }
            None => CounterSample::zero(),
        }
    }

    /// Reads counters for several projects in order, stopping early on request.
    pub async fn fetch_batch(&self, worker: WorkerId, ids: &[String]) -> Vec<(String, CounterSample)> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if self.is_stopped() {
                info!(processed = results.len(), total = ids.len(), "Browser batch stopped");
                break;
            }
            let sample = self.fetch_counters(worker, id).await;
            results.push((id.clone(), sample));
        }
        results
    }

    /// Closes the worker's session.
    pub async fn release(&self, worker: WorkerId) {
        self.registry.release(worker).await;
    }

    /// Closes every session.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    /// Drops cached results.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of cached results, fresh or not.
    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    /// Returns `None` when stopped mid-way.
    async fn sample(&self, worker: WorkerId, project_id: &str) -> Option<CounterSample> {
        let url = self.item_url(project_id);
        let mut last = CounterSample::zero();

        for attempt in 1..=self.config.attempts {
            if self.is_stopped() {
                return None;
            }

            match self.attempt(worker, &url).await {
                Ok(Some(sample)) if !sample.is_zero() => {
                    info!(
                        project_id,
                        attempt,
                        likes = sample.likes,
                        comments = sample.comments,
                        "Read counters from rendered page"
                    );
                    return Some(sample);
                }
                Ok(Some(sample)) => {
                    debug!(project_id, attempt, "Counters not rendered yet");
                    last = sample;
                }
                Ok(None) => return None,
                Err(e @ (BrowserError::NotFound(_) | BrowserError::Launch(_))) => {
                    warn!(project_id, error = %e, "Browser unavailable");
                    return Some(CounterSample::zero());
                }
                Err(e) => {
                    warn!(project_id, attempt, error = %e, "Browser sample failed");
                    last = CounterSample::zero();
                }
            }
        }

        Some(last)
    }

    async fn attempt(&self, worker: WorkerId, url: &str) -> Result<Option<CounterSample>, BrowserError> {
        let mut lease = self.registry.acquire(worker).await?;
        let session = lease.session_mut()?;

        session.navigate(url, self.config.navigation_timeout).await?;
        session.execute_js(SCROLL_SCRIPT).await?;

        if !self.wait(self.config.sample_interval).await {
            return Ok(None);
        }

        session.read_counters().await.map(Some)
    }

    /// Sleeps in short slices. Returns false if stopped.
    async fn wait(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_stopped() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            tokio::time::sleep(remaining.min(STOP_POLL)).await;
        }
    }

    async fn cached(&self, project_id: &str) -> Option<CounterSample> {
        let cache = self.cache.lock().await;
        cache
            .get(project_id)
            .filter(|(at, _)| at.elapsed() < self.config.cache_ttl)
            .map(|(_, sample)| *sample)
    }

    async fn remember(&self, project_id: &str, sample: CounterSample) {
        let ttl = self.config.cache_ttl;
        let mut cache = self.cache.lock().await;
        cache.retain(|_, (at, _)| at.elapsed() < ttl);
        cache.insert(project_id.to_string(), (Instant::now(), sample));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Serves counters per URL from a script; each read advances the script.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Arc<HashMap<String, Vec<CounterSample>>>,
        failing_navigations: usize,
        render_delay: Duration,
        opened: AtomicUsize,
        reads: Arc<StdMutex<HashMap<String, usize>>>,
        navigations: Arc<AtomicUsize>,
    }

    struct ScriptedSession {
        script: Arc<HashMap<String, Vec<CounterSample>>>,
        current: Option<String>,
        failures_left: usize,
        render_delay: Duration,
        reads: Arc<StdMutex<HashMap<String, usize>>>,
        navigations: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        fn with_script(entries: Vec<(&str, Vec<CounterSample>)>) -> Self {
            let script = entries
                .into_iter()
                .map(|(id, samples)| (format!("{DEFAULT_ITEM_URL_BASE}/{id}.html"), samples))
                .collect();
            Self {
                script: Arc::new(script),
                ..Self::default()
            }
        }

        fn reads(&self, id: &str) -> usize {
            let url = format!("{DEFAULT_ITEM_URL_BASE}/{id}.html");
            self.reads.lock().unwrap().get(&url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl BrowserBackend for ScriptedBackend {
        type Session = ScriptedSession;

        async fn open_session(&self) -> Result<ScriptedSession, BrowserError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedSession {
                script: Arc::clone(&self.script),
                current: None,
                failures_left: self.failing_navigations,
                render_delay: self.render_delay,
                reads: Arc::clone(&self.reads),
                navigations: Arc::clone(&self.navigations),
            })
        }
    }

    #[async_trait]
    impl BrowserSession for ScriptedSession {
        async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            self.navigations.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    message: "net::ERR_CONNECTION_RESET".to_string(),
                });
            }
            tokio::time::sleep(self.render_delay).await;
            self.current = Some(url.to_string());
            Ok(())
        }

        async fn execute_js(&mut self, _script: &str) -> Result<Value, BrowserError> {
            Ok(Value::Bool(true))
        }

        async fn read_counters(&mut self) -> Result<CounterSample, BrowserError> {
            tokio::time::sleep(self.render_delay).await;
            let url = self.current.clone().ok_or(BrowserError::Closed)?;
            let mut reads = self.reads.lock().unwrap();
            let n = reads.entry(url.clone()).or_default();
            let samples = self.script.get(&url).cloned().unwrap_or_default();
            let sample = samples
                .get((*n).min(samples.len().saturating_sub(1)))
                .copied()
                .unwrap_or_default();
            *n += 1;
            Ok(sample)
        }

        async fn close(&mut self) {
            self.current = None;
        }
    }

    fn fetcher(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, FallbackBrowserFetcher<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&backend)));
        let config = FallbackConfig::default().with_sample_interval(Duration::ZERO);
        (backend, FallbackBrowserFetcher::new(registry, config))
    }

    #[tokio::test]
    async fn test_first_non_zero_sample_wins() {
        let (backend, fetcher) = fetcher(ScriptedBackend::with_script(vec![(
            "100",
            vec![CounterSample::zero(), CounterSample::new(5, 0), CounterSample::new(9, 9)],
        )]));

        let sample = fetcher.fetch_counters(WorkerId(0), "100").await;
        assert_eq!(sample, CounterSample::new(5, 0));
        assert_eq!(backend.reads("100"), 2);
    }

    #[tokio::test]
    async fn test_all_zero_after_every_attempt() {
        let (backend, fetcher) = fetcher(ScriptedBackend::with_script(vec![(
            "100",
            vec![CounterSample::zero()],
        )]));

        let sample = fetcher.fetch_counters(WorkerId(0), "100").await;
        assert!(sample.is_zero());
        assert_eq!(backend.reads("100"), 3);
    }

    #[tokio::test]
    async fn test_navigation_error_counts_as_zero_sample() {
        let mut backend = ScriptedBackend::with_script(vec![("7", vec![CounterSample::new(1, 2)])]);
        backend.failing_navigations = 1;
        let (backend, fetcher) = fetcher(backend);

        let sample = fetcher.fetch_counters(WorkerId(0), "7").await;
        assert_eq!(sample, CounterSample::new(1, 2));
        assert_eq!(backend.navigations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let (backend, fetcher) = fetcher(ScriptedBackend::with_script(vec![(
            "100",
            vec![CounterSample::new(3, 4)],
        )]));

        fetcher.fetch_counters(WorkerId(0), "100").await;
        let again = fetcher.fetch_counters(WorkerId(1), "100").await;

        assert_eq!(again, CounterSample::new(3, 4));
        assert_eq!(backend.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.cached_entries().await, 1);

        fetcher.clear_cache().await;
        assert_eq!(fetcher.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_stop_flag_short_circuits() {
        let (backend, fetcher) = fetcher(ScriptedBackend::with_script(vec![(
            "100",
            vec![CounterSample::new(3, 4)],
        )]));
        fetcher.stop();

        assert!(fetcher.fetch_counters(WorkerId(0), "100").await.is_zero());
        assert!(fetcher.fetch_batch(WorkerId(0), &["100".to_string()]).await.is_empty());
        assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_batch_in_order() {
        let (_, fetcher) = fetcher(ScriptedBackend::with_script(vec![
            ("1", vec![CounterSample::new(1, 0)]),
            ("2", vec![CounterSample::new(2, 0)]),
        ]));

        let ids = vec!["1".to_string(), "2".to_string()];
        let results = fetcher.fetch_batch(WorkerId(0), &ids).await;

        assert_eq!(
            results,
            vec![
                ("1".to_string(), CounterSample::new(1, 0)),
                ("2".to_string(), CounterSample::new(2, 0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_workers_never_cross_report() {
        let mut backend = ScriptedBackend::with_script(vec![
            ("101", vec![CounterSample::new(101, 1)]),
            ("202", vec![CounterSample::new(202, 2)]),
        ]);
        backend.render_delay = Duration::from_millis(20);
        let (backend, fetcher) = fetcher(backend);
        let fetcher = Arc::new(fetcher);

        let a = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { fetcher.fetch_counters(WorkerId(1), "101").await })
        };
        let b = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { fetcher.fetch_counters(WorkerId(2), "202").await })
        };

        assert_eq!(a.await.unwrap(), CounterSample::new(101, 1));
        assert_eq!(b.await.unwrap(), CounterSample::new(202, 2));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);

        fetcher.shutdown().await;
        assert_eq!(fetcher.registry().open_sessions(), 0);
    }

    #[test]
    fn test_item_url() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(ScriptedBackend::default())));
        let fetcher = FallbackBrowserFetcher::new(
            registry,
            FallbackConfig::default().with_item_url_base("http://localhost:8080/item/"),
        );
        assert_eq!(fetcher.item_url("42"), "http://localhost:8080/item/42.html");
    }
}
