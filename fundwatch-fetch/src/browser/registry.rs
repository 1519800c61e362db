//! Per-worker browser sessions.
//!
//! Every [`WorkerId`] maps to its own slot holding at most one session.
//! Sessions are opened lazily, replaced when idle past the TTL and closed
//! when the worker releases them. A slot is never handed to another worker,
//! so concurrent fetches cannot observe each other's rendered page.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::{BrowserBackend, BrowserSession, WorkerId};
use crate::error::BrowserError;

/// Default idle time after which a session is recycled.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(5 * 60);

struct Slot<S> {
    session: Option<S>,
    last_used: Instant,
}

impl<S> Slot<S> {
    fn empty() -> Self {
        Self {
            session: None,
            last_used: Instant::now(),
        }
    }

    fn is_idle(&self, ttl: Duration) -> bool {
        self.session.is_some() && self.last_used.elapsed() > ttl
    }
}

/// Exclusive access to one worker's session.
///
/// Dropping the lease marks the session as used.
pub struct SessionLease<S: 'static> {
    guard: OwnedMutexGuard<Slot<S>>,
}

impl<S> SessionLease<S> {
    /// Returns the session.
    pub fn session_mut(&mut self) -> Result<&mut S, BrowserError> {
        self.guard.session.as_mut().ok_or(BrowserError::Closed)
    }
}

impl<S> Drop for SessionLease<S> {
    fn drop(&mut self) {
        self.guard.last_used = Instant::now();
    }
}

/// Map from worker identity to that worker's browser session.
pub struct SessionRegistry<B: BrowserBackend> {
    backend: Arc<B>,
    idle_ttl: Duration,
    slots: Mutex<HashMap<WorkerId, Arc<Mutex<Slot<B::Session>>>>>,
    open: AtomicUsize,
}

impl<B: BrowserBackend> SessionRegistry<B> {
    /// Creates a registry with the default idle TTL.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_idle_ttl(backend, DEFAULT_IDLE_TTL)
    }

    /// Creates a registry with a custom idle TTL.
    pub fn with_idle_ttl(backend: Arc<B>, idle_ttl: Duration) -> Self {
        Self {
            backend,
            idle_ttl,
            slots: Mutex::new(HashMap::new()),
            open: AtomicUsize::new(0),
        }
    }

    /// Returns the worker's session, opening or recycling it as needed.
    pub async fn acquire(&self, worker: WorkerId) -> Result<SessionLease<B::Session>, BrowserError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(
                slots
                    .entry(worker)
                    .or_insert_with(|| Arc::new(Mutex::new(Slot::empty()))),
            )
        };

        let mut guard = slot.lock_owned().await;

        if guard.is_idle(self.idle_ttl) {
            if let Some(mut stale) = guard.session.take() {
                debug!(worker = %worker, "Recycling idle browser session");
                self.close_session(&mut stale).await;
            }
        }

        if guard.session.is_none() {
            let session = self.backend.open_session().await?;
            self.open.fetch_add(1, Ordering::SeqCst);
            info!(worker = %worker, "Opened browser session");
            guard.session = Some(session);
        }

        guard.last_used = Instant::now();
        Ok(SessionLease { guard })
    }

    /// Closes and forgets the worker's session.
    pub async fn release(&self, worker: WorkerId) {
        let slot = self.slots.lock().await.remove(&worker);
        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            if let Some(mut session) = guard.session.take() {
                self.close_session(&mut session).await;
                info!(worker = %worker, "Released browser session");
            }
        }
    }

    /// Closes sessions idle past the TTL. Busy sessions are skipped.
    pub async fn purge_idle(&self) -> usize {
        let slots: Vec<_> = self.slots.lock().await.values().cloned().collect();
        let mut closed = 0;
        for slot in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.is_idle(self.idle_ttl) {
                if let Some(mut session) = guard.session.take() {
                    self.close_session(&mut session).await;
                    closed += 1;
                }
            }
        }
        if closed > 0 {
            debug!(closed, "Closed idle browser sessions");
        }
        closed
    }

    /// Closes every session.
    pub async fn shutdown_all(&self) {
        let slots: Vec<_> = self.slots.lock().await.drain().collect();
        for (worker, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(mut session) = guard.session.take() {
                self.close_session(&mut session).await;
                debug!(worker = %worker, "Closed browser session");
            }
        }
    }

    /// Number of open sessions, leased or idle.
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    async fn close_session(&self, session: &mut B::Session) {
        session.close().await;
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    struct CountingSession {
        id: usize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserBackend for CountingBackend {
        type Session = CountingSession;

        async fn open_session(&self) -> Result<CountingSession, BrowserError> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(CountingSession {
                id,
                closed: Arc::clone(&self.closed),
            })
        }
    }

    #[async_trait]
    impl BrowserSession for CountingSession {
        async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn execute_js(&mut self, _script: &str) -> Result<Value, BrowserError> {
            Ok(Value::Null)
        }
        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_one_session_per_worker() {
        let backend = Arc::new(CountingBackend::default());
        let registry = SessionRegistry::new(Arc::clone(&backend));

        let a1 = registry.acquire(WorkerId(1)).await.unwrap().session_mut().map(|s| s.id).unwrap();
        let a2 = registry.acquire(WorkerId(1)).await.unwrap().session_mut().map(|s| s.id).unwrap();
        let b = registry.acquire(WorkerId(2)).await.unwrap().session_mut().map(|s| s.id).unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
        assert_eq!(registry.open_sessions(), 2);
    }

    #[tokio::test]
    async fn test_leased_session_counts_as_open() {
        let backend = Arc::new(CountingBackend::default());
        let registry = SessionRegistry::new(Arc::clone(&backend));

        let lease = registry.acquire(WorkerId(1)).await.unwrap();
        drop(registry.acquire(WorkerId(2)).await.unwrap());
        assert_eq!(registry.open_sessions(), 2);

        drop(lease);
        registry.release(WorkerId(1)).await;
        assert_eq!(registry.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_idle_session_is_recycled() {
        let backend = Arc::new(CountingBackend::default());
        let registry = SessionRegistry::with_idle_ttl(Arc::clone(&backend), Duration::ZERO);

        drop(registry.acquire(WorkerId(1)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(registry.acquire(WorkerId(1)).await.unwrap());

        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
        assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_purge_idle() {
        let backend = Arc::new(CountingBackend::default());
        let registry = SessionRegistry::with_idle_ttl(Arc::clone(&backend), Duration::ZERO);

        drop(registry.acquire(WorkerId(1)).await.unwrap());
        drop(registry.acquire(WorkerId(2)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(registry.purge_idle().await, 2);
        assert_eq!(registry.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_release_and_shutdown() {
        let backend = Arc::new(CountingBackend::default());
        let registry = SessionRegistry::new(Arc::clone(&backend));

        drop(registry.acquire(WorkerId(1)).await.unwrap());
        drop(registry.acquire(WorkerId(2)).await.unwrap());
        drop(registry.acquire(WorkerId(3)).await.unwrap());

        registry.release(WorkerId(1)).await;
        assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.open_sessions(), 2);

        registry.shutdown_all().await;
        assert_eq!(backend.closed.load(Ordering::SeqCst), 3);
        assert_eq!(registry.open_sessions(), 0);
    }
}
