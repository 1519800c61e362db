//! Pooled HTTP gateway with response caching and request statistics.
//!
//! Every outbound request in the acquisition layer goes through
//! [`CachingHttpGateway`]. It owns one pooled reqwest client, re-sends
//! idempotent requests on transient failures, serves GETs from the
//! [`ResponseCache`] and keeps a bounded request history for analysis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, DEFAULT_MAX_AGE, ResponseCache, fingerprint};
use crate::error::FetchError;
use crate::recovery::Remediate;
use crate::retry::TransportRetry;

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Idle connections kept per host.
const DEFAULT_POOL_PER_HOST: usize = 20;

/// User agent for gateway requests.
const USER_AGENT: &str = concat!("fundwatch/", env!("CARGO_PKG_VERSION"));

/// Requests kept in the history ring.
const HISTORY_CAPACITY: usize = 1000;

/// Requests considered by [`CachingHttpGateway::analyze_performance`].
const ANALYSIS_WINDOW: usize = 100;

/// Longest error text stored in the history.
const MAX_ERROR_CHARS: usize = 100;

/// Smoothing factor for the response time average.
const EWMA_ALPHA: f64 = 0.1;

// ============================================================================
// Configuration
// ============================================================================

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Idle pooled connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Transport retry policy.
    pub retry: TransportRetry,
    /// Default freshness window for cached responses.
    pub cache_max_age: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pool_max_idle_per_host: DEFAULT_POOL_PER_HOST,
            retry: TransportRetry::default(),
            cache_max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl GatewayConfig {
    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the transport retry policy.
    pub fn with_retry(mut self, retry: TransportRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cache freshness window.
    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }
}

// ============================================================================
// Request & Response
// ============================================================================

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// URL-encoded form.
    Form(BTreeMap<String, String>),
    /// JSON document.
    Json(Value),
}

/// A request routed through the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL without query parameters.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Query parameters.
    pub params: BTreeMap<String, String>,
    /// Optional body.
    pub body: Option<RequestBody>,
    /// Whether the response cache may be used.
    pub use_cache: bool,
    /// Freshness window overriding the gateway default.
    pub max_age: Option<Duration>,
    /// Timeout overriding the gateway default.
    pub timeout: Option<Duration>,
}

impl GatewayRequest {
    /// Creates a request.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            use_cache: true,
            max_age: None,
            timeout: None,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces all headers.
    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Adds a query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replaces all query parameters.
    pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Sets a form body.
    pub fn form(mut self, form: BTreeMap<String, String>) -> Self {
        self.body = Some(RequestBody::Form(form));
        self
    }

    /// Sets a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Bypasses the response cache.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Sets the freshness window for this request.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Sets the timeout for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn is_cacheable(&self) -> bool {
        self.use_cache && self.method == Method::GET
    }
}

/// A response returned by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers, lowercased.
    pub headers: BTreeMap<String, String>,
    /// Raw body.
    pub content: Vec<u8>,
    /// Whether the response came from the cache.
    pub from_cache: bool,
    /// Time spent producing the response.
    pub elapsed: Duration,
}

impl GatewayResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.content)?)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Cumulative gateway counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Requests received, including cache hits.
    pub total_requests: u64,
    /// Requests answered with a 2xx status from upstream.
    pub successful_requests: u64,
    /// Requests that ended without a usable response.
    pub failed_requests: u64,
    /// Requests answered from the cache.
    pub cached_requests: u64,
    /// Transport retries performed.
    pub retried_requests: u64,
    /// Body bytes received from upstream.
    pub total_bytes: u64,
    /// Smoothed response time of successful requests, in seconds.
    pub avg_response_time: f64,
}

impl GatewayStats {
    /// Fraction of requests answered from the cache.
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cached_requests as f64 / self.total_requests as f64
        }
    }

    /// Fraction of upstream requests that succeeded.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let upstream = self.total_requests.saturating_sub(self.cached_requests);
        if upstream == 0 {
            0.0
        } else {
            self.successful_requests as f64 / upstream as f64
        }
    }

    fn record_success(&mut self, elapsed: Duration, bytes: usize) {
        self.successful_requests += 1;
        self.total_bytes += bytes as u64;
        let secs = elapsed.as_secs_f64();
        if self.successful_requests == 1 {
            self.avg_response_time = secs;
        } else {
            self.avg_response_time = EWMA_ALPHA * secs + (1.0 - EWMA_ALPHA) * self.avg_response_time;
        }
    }
}

/// One entry of the request history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// When the request finished.
    pub timestamp: DateTime<Utc>,
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Final status, if a response arrived.
    pub status: Option<u16>,
    /// Time spent, in seconds.
    pub response_time: f64,
    /// Body size in bytes.
    pub bytes: usize,
    /// Whether the cache answered.
    pub from_cache: bool,
    /// Failure text, truncated.
    pub error: Option<String>,
}

impl RequestLogEntry {
    fn succeeded(&self) -> bool {
        self.error.is_none() && !self.from_cache
    }
}

/// Summary of recent requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    /// Requests considered.
    pub sample_size: usize,
    /// Mean response time of successful requests, in seconds.
    pub avg_response_time: f64,
    /// Fastest successful request, in seconds.
    pub min_response_time: f64,
    /// Slowest successful request, in seconds.
    pub max_response_time: f64,
    /// Fraction of considered requests without an error.
    pub success_rate: f64,
    /// Most frequent error strings with their counts.
    pub top_errors: Vec<(String, usize)>,
}

#[derive(Debug, Default)]
struct GatewayState {
    stats: GatewayStats,
    history: VecDeque<RequestLogEntry>,
}

impl GatewayState {
    fn push(&mut self, entry: RequestLogEntry) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }
}

struct RawResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    content: Vec<u8>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Caching HTTP gateway.
pub struct CachingHttpGateway {
    config: GatewayConfig,
    client: RwLock<Client>,
    cache: Option<ResponseCache>,
    state: Mutex<GatewayState>,
}

impl CachingHttpGateway {
    /// Creates a gateway without a response cache.
    pub fn new(config: GatewayConfig) -> Result<Self, FetchError> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client: RwLock::new(client),
            cache: None,
            state: Mutex::new(GatewayState::default()),
        })
    }

    /// Creates a gateway backed by a response cache.
    pub fn with_cache(config: GatewayConfig, cache: ResponseCache) -> Result<Self, FetchError> {
        let mut gateway = Self::new(config)?;
        gateway.cache = Some(cache);
        Ok(gateway)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Sends a request. Failures are recorded and yield `None`.
    pub async fn request(&self, request: GatewayRequest) -> Option<GatewayResponse> {
        self.try_request(request).await.ok()
    }

    /// Sends a request, returning the failure when there is no usable response.
    ///
    /// Non-2xx statuses become [`FetchError::Status`].
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn try_request(&self, request: GatewayRequest) -> Result<GatewayResponse, FetchError> {
        let started = Instant::now();
        self.state.lock().await.stats.total_requests += 1;

        let cache_key = (request.is_cacheable() && self.cache.is_some())
            .then(|| fingerprint(&request.url, &request.headers, &request.params));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            let max_age = request.max_age.unwrap_or(self.config.cache_max_age);
            match cache.get(key, max_age) {
                Ok(Some(hit)) => {
                    debug!("Cache hit");
                    let response = GatewayResponse {
                        status: hit.status,
                        headers: hit.headers,
                        content: hit.content,
                        from_cache: true,
                        elapsed: started.elapsed(),
                    };
                    let mut state = self.state.lock().await;
                    state.stats.cached_requests += 1;
                    state.push(log_entry(&request, Some(response.status), &response, None));
                    return Ok(response);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Cache lookup failed"),
            }
        }

        let result = self.send_with_retry(&request).await;
        let elapsed = started.elapsed();

        match result {
            Ok(raw) if (200..300).contains(&raw.status) => {
                if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                    if let Err(e) = cache.set(key, &request.url, &raw.content, raw.status, &raw.headers) {
                        warn!(error = %e, "Failed to store response in cache");
                    }
                }
                let response = GatewayResponse {
                    status: raw.status,
                    headers: raw.headers,
                    content: raw.content,
                    from_cache: false,
                    elapsed,
                };
                let mut state = self.state.lock().await;
                state.stats.record_success(elapsed, response.content.len());
                state.push(log_entry(&request, Some(response.status), &response, None));
                debug!(status = response.status, elapsed_ms = elapsed.as_millis(), "Request succeeded");
                Ok(response)
            }
            Ok(raw) => {
                let error = FetchError::status(raw.status, request.url.clone());
                self.record_failure(&request, Some(raw.status), elapsed, &error).await;
                Err(error)
            }
            Err(error) => {
                self.record_failure(&request, None, elapsed, &error).await;
                Err(error)
            }
        }
    }

    async fn record_failure(
        &self,
        request: &GatewayRequest,
        status: Option<u16>,
        elapsed: Duration,
        error: &FetchError,
    ) {
        warn!(url = %request.url, status, error = %error, "Request failed");
        let mut state = self.state.lock().await;
        state.stats.failed_requests += 1;
        state.push(RequestLogEntry {
            timestamp: Utc::now(),
            method: request.method.to_string(),
            url: request.url.clone(),
            status,
            response_time: elapsed.as_secs_f64(),
            bytes: 0,
            from_cache: false,
            error: Some(truncate(&error.to_string(), MAX_ERROR_CHARS)),
        });
    }

    async fn send_with_retry(&self, request: &GatewayRequest) -> Result<RawResponse, FetchError> {
        let client = self.client.read().await.clone();
        let policy = &self.config.retry;
        let mut retries = 0;

        loop {
            match self.build(&client, request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if retries < policy.max_retries && policy.should_retry_status(&request.method, status) {
                        retries += 1;
                        let delay = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                            retry_after(&response)
                                .map_or_else(|| policy.delay_for_retry(retries), |d| d.min(policy.max_delay))
                        } else {
                            policy.delay_for_retry(retries)
                        };
                        warn!(status = status.as_u16(), retry = retries, delay_ms = delay.as_millis(), "Retrying request");
                        self.state.lock().await.stats.retried_requests += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return read_response(response).await;
                }
                Err(e) => {
                    if retries < policy.max_retries && policy.should_retry_error(&request.method, &e) {
                        retries += 1;
                        let delay = policy.delay_for_retry(retries);
                        warn!(error = %e, retry = retries, delay_ms = delay.as_millis(), "Request failed, retrying");
                        self.state.lock().await.stats.retried_requests += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if e.is_timeout() {
                        let timeout = request.timeout.unwrap_or(self.config.timeout);
                        return Err(FetchError::Timeout(timeout.as_secs()));
                    }
                    return Err(e.into());
                }
            }
        }
    }

    fn build(&self, client: &Client, request: &GatewayRequest) -> reqwest::RequestBuilder {
        let mut builder = client.request(request.method.clone(), &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        match &request.body {
            Some(RequestBody::Form(form)) => builder.form(form),
            Some(RequestBody::Json(json)) => builder.json(json),
            None => builder,
        }
    }

    /// Returns a snapshot of the counters.
    pub async fn stats(&self) -> GatewayStats {
        self.state.lock().await.stats
    }

    /// Returns up to `limit` of the most recent history entries, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<RequestLogEntry> {
        let state = self.state.lock().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Summarizes the last 100 requests.
    #[allow(clippy::cast_precision_loss)]
    pub async fn analyze_performance(&self) -> PerformanceAnalysis {
        let recent = self.history(ANALYSIS_WINDOW).await;
        if recent.is_empty() {
            return PerformanceAnalysis::default();
        }

        let times: Vec<f64> = recent
            .iter()
            .filter(|e| e.succeeded())
            .map(|e| e.response_time)
            .collect();

        let (avg, min, max) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                times.iter().sum::<f64>() / times.len() as f64,
                times.iter().copied().fold(f64::INFINITY, f64::min),
                times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };

        let without_error = recent.iter().filter(|e| e.error.is_none()).count();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for error in recent.iter().filter_map(|e| e.error.as_deref()) {
            *counts.entry(error).or_default() += 1;
        }
        let mut top_errors: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(e, n)| (e.to_string(), n))
            .collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_errors.truncate(5);

        PerformanceAnalysis {
            sample_size: recent.len(),
            avg_response_time: avg,
            min_response_time: min,
            max_response_time: max,
            success_rate: without_error as f64 / recent.len() as f64,
            top_errors,
        }
    }

    /// Returns cache usage, if a cache is attached.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().and_then(|c| c.stats().ok())
    }

    /// Drops every cached response.
    pub fn clear_cache(&self) -> Result<usize, FetchError> {
        match &self.cache {
            Some(cache) => {
                let removed = cache.clear()?;
                info!(removed, "Cleared response cache");
                Ok(removed)
            }
            None => Ok(0),
        }
    }

    /// Rebuilds the HTTP client, dropping pooled connections.
    pub async fn reset_connections(&self) -> Result<(), FetchError> {
        let client = build_client(&self.config)?;
        *self.client.write().await = client;
        info!("Reset HTTP connection pool");
        Ok(())
    }

    /// Purges expired cache rows.
    pub fn reclaim(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        match cache.purge_expired(self.config.cache_max_age) {
            Ok(purged) => {
                if purged > 0 {
                    info!(purged, "Purged expired cache entries");
                }
                purged
            }
            Err(e) => {
                warn!(error = %e, "Failed to purge expired cache entries");
                0
            }
        }
    }
}

impl std::fmt::Debug for CachingHttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingHttpGateway")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Remediate for CachingHttpGateway {
    async fn reset_connections(&self) {
        if let Err(e) = CachingHttpGateway::reset_connections(self).await {
            warn!(error = %e, "Failed to reset connections");
        }
    }

    async fn reclaim(&self) {
        CachingHttpGateway::reclaim(self);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn build_client(config: &GatewayConfig) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .timeout(config.timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(USER_AGENT)
        .build()?)
}

async fn read_response(response: Response) -> Result<RawResponse, FetchError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let content = response.bytes().await?.to_vec();
    Ok(RawResponse {
        status,
        headers,
        content,
    })
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn log_entry(
    request: &GatewayRequest,
    status: Option<u16>,
    response: &GatewayResponse,
    error: Option<String>,
) -> RequestLogEntry {
    RequestLogEntry {
        timestamp: Utc::now(),
        method: request.method.to_string(),
        url: request.url.clone(),
        status,
        response_time: response.elapsed.as_secs_f64(),
        bytes: response.content.len(),
        from_cache: response.from_cache,
        error,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
