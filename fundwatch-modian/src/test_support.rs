//! Fakes shared by the unit tests of this crate.

use async_trait::async_trait;
use fundwatch_core::CounterSample;
use fundwatch_fetch::{BrowserBackend, BrowserError, BrowserSession};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Renders the same counters on every page.
pub(crate) struct CountingBackend {
    sample: CounterSample,
    navigations: Arc<AtomicUsize>,
}

pub(crate) struct CountingSession {
    sample: CounterSample,
    navigations: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub(crate) fn new(sample: CounterSample) -> Self {
        Self {
            sample,
            navigations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserBackend for CountingBackend {
    type Session = CountingSession;

    async fn open_session(&self) -> Result<CountingSession, BrowserError> {
        Ok(CountingSession {
            sample: self.sample,
            navigations: Arc::clone(&self.navigations),
        })
    }
}

#[async_trait]
impl BrowserSession for CountingSession {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_js(&mut self, _script: &str) -> Result<Value, BrowserError> {
        Ok(json!({
            "likes": self.sample.likes.to_string(),
            "comments": self.sample.comments.to_string(),
        }))
    }

    async fn close(&mut self) {}
}

/// A detail response for a project with goal 1000 and 250 raised.
pub(crate) fn detail_body(id: &str, likes: u64, comments: u64) -> String {
    let project = json!([{
        "id": id,
        "name": format!("Project {id}"),
        "goal": "1000",
        "backer_money": "250",
        "status": "众筹中",
        "bull_count": likes,
        "comment_count": comments,
    }]);
    format!("jQuery1700000000000({project});")
}

/// Mounts the probe and detail endpoints for one project id.
pub(crate) async fn mount_project(server: &MockServer, id: &str, body: &str) {
    mount_slow_project(server, id, body, Duration::ZERO).await;
}

/// Like [`mount_project`], but the detail endpoint answers after `delay`.
pub(crate) async fn mount_slow_project(
    server: &MockServer,
    id: &str,
    body: &str,
    delay: Duration,
) {
    Mock::given(method("GET"))
        .and(path("/p/get_project_limit_status"))
        .and(query_param("pro_id", id))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":0}"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/realtime/get_simple_product"))
        .and(query_param("ids", id))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body.to_string())
                .set_delay(delay),
        )
        .mount(server)
        .await;
}
