//! Signed request client for the modian endpoints.
//!
//! Wraps the shared [`CachingHttpGateway`] with the browser-like headers,
//! request signing and the two-stage project lookup (existence probe, then
//! the JSONP detail endpoint).

use chrono::Utc;
use fundwatch_core::ProjectRecord;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

use fundwatch_fetch::{CachingHttpGateway, FetchError, GatewayRequest, GatewayResponse};

use crate::parser::{parse_jsonp, project_payload, to_record};
use crate::signing::{API_BASE_URL, APP_KEY, current_mt, sign};

/// Public web host serving the probe and detail endpoints.
pub const WEB_BASE_URL: &str = "https://zhongchou.modian.com";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

// ============================================================================
// Configuration
// ============================================================================

/// Endpoint configuration for [`SignedRequestClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base for relative signed API paths.
    pub api_base_url: String,
    /// Base for the probe and detail endpoints.
    pub web_base_url: String,
    /// Signing key.
    pub app_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: API_BASE_URL.to_string(),
            web_base_url: WEB_BASE_URL.to_string(),
            app_key: APP_KEY.to_string(),
        }
    }
}

impl ClientConfig {
    /// Sets the API base URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets the web base URL.
    pub fn with_web_base_url(mut self, url: impl Into<String>) -> Self {
        self.web_base_url = url.into();
        self
    }
}

/// Optional user identity attached to signed requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Session token.
    pub token: Option<String>,
    /// User id.
    pub user_id: Option<String>,
}

impl Identity {
    /// Returns true if neither token nor user id is set.
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.user_id.is_none()
    }
}

/// Request counters of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    /// Requests sent.
    pub total_requests: u64,
    /// Requests that returned a 2xx response.
    pub successful_requests: u64,
    /// Requests that failed.
    pub failed_requests: u64,
    /// Successful / total in percent.
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    error: AtomicU64,
}

// ============================================================================
// Client
// ============================================================================

/// Client for the signed API and the JSONP detail endpoint.
pub struct SignedRequestClient {
    gateway: Arc<CachingHttpGateway>,
    config: ClientConfig,
    callback_seq: AtomicU64,
    counters: Counters,
}

impl SignedRequestClient {
    /// Creates a client on top of a shared gateway.
    pub fn new(gateway: Arc<CachingHttpGateway>, config: ClientConfig) -> Self {
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            gateway,
            config,
            callback_seq: AtomicU64::new(seed),
            counters: Counters::default(),
        }
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &Arc<CachingHttpGateway> {
        &self.gateway
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a signed request.
    ///
    /// The signature is computed fresh for every call. GET parameters are
    /// carried in the signed query; for other methods they are sent as JSON.
    #[instrument(skip(self, params, identity), fields(method = %method))]
    pub async fn authenticated_request(
        &self,
        url: &str,
        method: Method,
        params: &BTreeMap<String, String>,
        identity: Option<&Identity>,
    ) -> Result<GatewayResponse, FetchError> {
        let full_url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{url}", self.config.api_base_url)
        };
        let signed = sign(&full_url, &method, params, &self.config.app_key, current_mt())?;
        debug!(url = %signed.request_url, mt = signed.mt, "Signed request");

        let mut request = GatewayRequest::new(method.clone(), signed.request_url)
            .headers(default_headers())
            .header("build", "15000")
            .header("client", "11")
            .header("mt", signed.mt.to_string())
            .header("sign", signed.sign)
            .without_cache();

        if let Some(identity) = identity {
            if let Some(token) = &identity.token {
                request = request.header("token", token.clone());
            }
            if let Some(user_id) = &identity.user_id {
                request = request
                    .header("user_id", user_id.clone())
                    .header("userid", user_id.clone());
            }
        }

        if method != Method::GET {
            let body: Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            request = request.json(Value::Object(body));
        }

        self.send(request).await
    }

    /// Sends an unsigned GET with the default headers.
    pub async fn simple_request(&self, url: &str) -> Result<GatewayResponse, FetchError> {
        let request = GatewayRequest::get(url)
            .headers(default_headers())
            .without_cache();
        self.send(request).await
    }

    /// Fetches one project, surfacing the failing stage.
    #[instrument(skip(self))]
    pub async fn try_project_data(&self, id: &str) -> Result<ProjectRecord, FetchError> {
        let base = &self.config.web_base_url;

        let probe_url = format!("{base}/p/get_project_limit_status?pro_id={id}");
        self.simple_request(&probe_url).await?;

        let n = self.next_callback();
        let detail_url = format!(
            "{base}/realtime/get_simple_product?jsonpcallback=jQuery{n}&ids={id}&if_all=1&_={}",
            n + 1
        );
        let detail = self.simple_request(&detail_url).await?;

        let payload = parse_jsonp(&detail.text())?;
        let record = to_record(id, project_payload(&payload)?);
        info!(
            id,
            likes = record.like_count,
            comments = record.comment_count,
            "Fetched project data"
        );
        Ok(record)
    }

    /// Fetches one project. Any failure yields [`ProjectRecord::unknown`].
    pub async fn get_project_data(&self, id: &str) -> ProjectRecord {
        match self.try_project_data(id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(id, error = %e, "Project fetch failed, using default record");
                ProjectRecord::unknown(id)
            }
        }
    }

    /// Returns the request counters.
    pub fn stats(&self) -> ClientStats {
        let total = self.counters.total.load(Ordering::Relaxed);
        let success = self.counters.success.load(Ordering::Relaxed);
        let error = self.counters.error.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        ClientStats {
            total_requests: total,
            successful_requests: success,
            failed_requests: error,
            success_rate,
        }
    }

    fn next_callback(&self) -> u64 {
        self.callback_seq.fetch_add(2, Ordering::Relaxed)
    }

    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse, FetchError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let result = self.gateway.try_request(request).await;
        match &result {
            Ok(_) => self.counters.success.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.error.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

/// Browser-like headers sent with every request.
fn default_headers() -> BTreeMap<String, String> {
    [
        ("accept", "application/json, text/javascript, */*; q=0.01"),
        ("accept-language", "zh-CN,zh;q=0.9"),
        ("priority", "u=1, i"),
        (
            "sec-ch-ua",
            r#""Google Chrome";v="137", "Chromium";v="137", "Not/A)Brand";v="24""#,
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", r#""Linux""#),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-origin"),
        ("x-requested-with", "XMLHttpRequest"),
        ("user-agent", BROWSER_USER_AGENT),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundwatch_core::FetchSource;
    use fundwatch_fetch::{GatewayConfig, TransportRetry};
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE: &str = r#"jQuery123({"id":"55","name":"Demo","goal":"1000","backer_money":"250","status":"success","reward_list":[{"if_show":1,"title":"T1","money":"50","max_total":10,"back_count":3}]})"#;

    fn client(server: &MockServer) -> SignedRequestClient {
        let gateway = CachingHttpGateway::new(
            GatewayConfig::default().with_retry(TransportRetry::no_retry()),
        )
        .unwrap();
        let config = ClientConfig::default()
            .with_api_base_url(server.uri())
            .with_web_base_url(server.uri());
        SignedRequestClient::new(Arc::new(gateway), config)
    }

    async fn mount_probe(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/p/get_project_limit_status"))
            .and(query_param("pro_id", "55"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":0}"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_end_to_end_fixture() {
        let server = MockServer::start().await;
        mount_probe(&server).await;
        Mock::given(method("GET"))
            .and(path("/realtime/get_simple_product"))
            .and(query_param("ids", "55"))
            .and(query_param("if_all", "1"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .mount(&server)
            .await;

        let client = client(&server);
        let record = client.get_project_data("55").await;

        assert_eq!(record.source, FetchSource::Api);
        assert!((record.target_amount - 1000.0).abs() < f64::EPSILON);
        assert!((record.raised_amount - 250.0).abs() < f64::EPSILON);
        assert!((record.completion_rate - 25.0).abs() < f64::EPSILON);
        assert_eq!(record.reward_tiers.len(), 1);
        assert_eq!(record.reward_tiers[0].remaining, Some(7));

        let stats = client.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 2);
        assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_malformed_jsonp_yields_unknown() {
        let server = MockServer::start().await;
        mount_probe(&server).await;
        Mock::given(method("GET"))
            .and(path("/realtime/get_simple_product"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
            .mount(&server)
            .await;

        let record = client(&server).get_project_data("55").await;
        assert!(record.is_default());
        assert_eq!(record.status, "unknown");
    }

    #[tokio::test]
    async fn test_failed_probe_skips_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/get_project_limit_status"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/realtime/get_simple_product"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let result = client.try_project_data("55").await;
        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));

        let stats = client.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_callback_names_are_unique() {
        let server = MockServer::start().await;
        let client = client(&server);
        let a = client.next_callback();
        let b = client.next_callback();
        assert_eq!(b, a + 2);
    }

    #[tokio::test]
    async fn test_authenticated_get_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apim/user/info"))
            .and(query_param("a", "1"))
            .and(header("build", "15000"))
            .and(header("client", "11"))
            .and(header("token", "tok"))
            .and(header("userid", "u1"))
            .and(header("user_id", "u1"))
            .and(header_exists("sign"))
            .and(header_exists("mt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let identity = Identity {
            token: Some("tok".into()),
            user_id: Some("u1".into()),
        };
        let params = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let response = client(&server)
            .authenticated_request("/apim/user/info", Method::GET, &params, Some(&identity))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_authenticated_post_sends_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apim/follow"))
            .and(body_json(serde_json::json!({"pro_id": "55"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let params = BTreeMap::from([("pro_id".to_string(), "55".to_string())]);
        let response = client(&server)
            .authenticated_request("/apim/follow", Method::POST, &params, None)
            .await
            .unwrap();
        assert!(response.is_success());
    }
}
