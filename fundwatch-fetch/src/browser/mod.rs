//! Headless browser fallback.
//!
//! Some project counters are only rendered client-side. This module reads
//! them from a real page:
//!
//! - [`BrowserBackend`] / [`BrowserSession`] - Launch and drive a browser
//! - [`ChromiumBackend`] - chromiumoxide implementation
//! - [`SessionRegistry`] - One session per worker, torn down explicitly
//! - [`FallbackBrowserFetcher`] - Navigate, scroll, sample, cache

use async_trait::async_trait;
use fundwatch_core::CounterSample;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::BrowserError;

mod chromium;
mod fallback;
mod registry;

pub use chromium::{ChromiumBackend, ChromiumSession, find_chromium};
pub use fallback::{FallbackBrowserFetcher, FallbackConfig};
pub use registry::{SessionLease, SessionRegistry};

/// Scrolls the page so lazily-mounted counters render.
pub const SCROLL_SCRIPT: &str = r"
window.scrollTo(0, document.body.scrollHeight / 2);
window.scrollTo(0, document.body.scrollHeight);
setTimeout(function () {
    window.dispatchEvent(new Event('scroll'));
}, 100);
true
";

/// Reads the like and comment counters. Non-numeric text reads as `"0"`.
pub const COUNTER_SCRIPT: &str = r"
(() => {
    const pick = (selector) => {
        for (const el of document.querySelectorAll(selector)) {
            const text = (el.textContent || '').trim();
            if (/^\d+$/.test(text)) {
                return text;
            }
        }
        return '0';
    };
    return {
        likes: pick('li.atten span'),
        comments: pick('li.nav-comment span'),
    };
})()
";

// ============================================================================
// Worker identity
// ============================================================================

/// Identity of a batch worker. Each worker owns at most one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

// ============================================================================
// Backend traits
// ============================================================================

/// Launches browser sessions.
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
    /// Session type produced by this backend.
    type Session: BrowserSession;

    /// Starts a fresh, isolated session.
    async fn open_session(&self) -> Result<Self::Session, BrowserError>;
}

/// A single browser instance with one page.
#[async_trait]
pub trait BrowserSession: Send + 'static {
    /// Navigates the page and waits for it to load.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Evaluates a script and returns its JSON result.
    async fn execute_js(&mut self, script: &str) -> Result<Value, BrowserError>;

    /// Reads the engagement counters from the current page.
    async fn read_counters(&mut self) -> Result<CounterSample, BrowserError> {
        let value = self.execute_js(COUNTER_SCRIPT).await?;
        Ok(parse_counters(&value))
    }

    /// Shuts the session down.
    async fn close(&mut self);
}

/// Converts the counter script result into a sample.
pub fn parse_counters(value: &Value) -> CounterSample {
    CounterSample::new(
        parse_counter(value.get("likes")),
        parse_counter(value.get("comments")),
    )
}

fn parse_counter(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().unwrap_or(0)
            } else {
                0
            }
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_counters() {
        assert_eq!(
            parse_counters(&json!({"likes": "128", "comments": "7"})),
            CounterSample::new(128, 7)
        );
        assert_eq!(
            parse_counters(&json!({"likes": 3, "comments": "1.2k"})),
            CounterSample::new(3, 0)
        );
        assert_eq!(parse_counters(&json!(null)), CounterSample::zero());
    }

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId(3).to_string(), "worker-3");
    }
}
