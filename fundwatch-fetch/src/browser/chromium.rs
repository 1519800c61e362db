//! Chromium backend using chromiumoxide.
//!
//! Each session is its own headless Chromium process with a private
//! profile directory, so sessions share no cookies, storage or tabs.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{BrowserBackend, BrowserSession};
use crate::error::BrowserError;

/// Environment variable naming an explicit Chromium binary.
pub const CHROMIUM_PATH_ENV: &str = "FUNDWATCH_CHROMIUM_PATH";

/// Finds a Chromium binary.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches headless Chromium sessions.
#[derive(Debug)]
pub struct ChromiumBackend {
    executable: PathBuf,
    launched: AtomicUsize,
}

impl ChromiumBackend {
    /// Creates a backend for the first Chromium found on this machine.
    pub fn detect() -> Result<Self, BrowserError> {
        find_chromium().map(Self::with_executable).ok_or_else(|| {
            BrowserError::NotFound(format!("set {CHROMIUM_PATH_ENV} or install Chromium"))
        })
    }

    /// Creates a backend for an explicit binary.
    pub fn with_executable(executable: PathBuf) -> Self {
        Self {
            executable,
            launched: AtomicUsize::new(0),
        }
    }

    /// Returns the binary in use.
    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }

    fn profile_dir(&self) -> PathBuf {
        let n = self.launched.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("fundwatch-chromium-{}-{n}", std::process::id()))
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    type Session = ChromiumSession;

    async fn open_session(&self) -> Result<ChromiumSession, BrowserError> {
        let profile = self.profile_dir();

        let config = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .user_data_dir(&profile)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--blink-settings=imagesEnabled=false")
            .build()
            .map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(BrowserError::Launch(e.to_string()));
            }
        };

        debug!(profile = %profile.display(), "Launched Chromium");

        Ok(ChromiumSession {
            browser,
            page,
            handler,
            profile,
            closed: false,
        })
    }
}

/// One Chromium process with a single page.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile: PathBuf,
    closed: bool,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        if self.closed {
            return Err(BrowserError::Closed);
        }

        let page = &self.page;
        within_deadline(url, timeout, async move {
            page.goto(url).await?;
            // A failed load wait still leaves a page to read.
            let _ = page.wait_for_navigation().await;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await
    }

    async fn execute_js(&mut self, script: &str) -> Result<Value, BrowserError> {
        if self.closed {
            return Err(BrowserError::Closed);
        }

        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;

        result
            .into_value()
            .map_err(|e| BrowserError::Script(format!("{e:?}")))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        let _ = tokio::fs::remove_dir_all(&self.profile).await;
        debug!(profile = %self.profile.display(), "Closed Chromium");
    }
}

/// Runs a navigation, load wait included, under a single deadline.
async fn within_deadline<F, E>(url: &str, timeout: Duration, navigation: F) -> Result<(), BrowserError>
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, navigation).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BrowserError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(BrowserError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stalled_load_hits_deadline() {
        let limit = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let result = within_deadline("https://zhongchou.modian.com/item/1.html", limit, async {
            // Navigation committed, the load event never arrives.
            std::future::pending::<()>().await;
            Ok::<_, BrowserError>(())
        })
        .await;

        assert!(matches!(result, Err(BrowserError::Timeout(d)) if d == limit));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_navigation_failure_keeps_url() {
        let result = within_deadline("about:blank", Duration::from_secs(1), async {
            Err::<(), _>("net::ERR_NAME_NOT_RESOLVED")
        })
        .await;

        match result {
            Err(BrowserError::Navigation { url, message }) => {
                assert_eq!(url, "about:blank");
                assert!(message.contains("ERR_NAME_NOT_RESOLVED"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_executable() {
        let backend = ChromiumBackend::with_executable(PathBuf::from("/opt/chrome"));
        assert_eq!(backend.executable(), &PathBuf::from("/opt/chrome"));
    }

    #[test]
    fn test_profile_dirs_are_unique() {
        let backend = ChromiumBackend::with_executable(PathBuf::from("/opt/chrome"));
        assert_ne!(backend.profile_dir(), backend.profile_dir());
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_reads_counters() {
        let backend = ChromiumBackend::detect().unwrap();
        let mut session = backend.open_session().await.unwrap();

        session
            .navigate(
                "data:text/html,<ul><li class='atten'><span>12</span></li><li class='nav-comment'><span>3</span></li></ul>",
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let counters = session.read_counters().await.unwrap();
        assert_eq!(counters.likes, 12);
        assert_eq!(counters.comments, 3);
        session.close().await;
    }
}
