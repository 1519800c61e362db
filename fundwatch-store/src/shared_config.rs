//! Runtime configuration published to every worker.
//!
//! Readers take cheap snapshots; the tuner swaps in whole new values.

use fundwatch_core::RuntimeConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared, swappable [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct SharedConfig {
    tx: Arc<watch::Sender<RuntimeConfig>>,
}

impl SharedConfig {
    /// Publishes an initial configuration.
    pub fn new(initial: RuntimeConfig) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current configuration.
    pub fn snapshot(&self) -> RuntimeConfig {
        self.tx.borrow().clone()
    }

    /// Subscribes to configuration changes.
    pub fn subscribe(&self) -> watch::Receiver<RuntimeConfig> {
        self.tx.subscribe()
    }

    /// Replaces the configuration. Returns true if it changed.
    pub fn replace(&self, next: RuntimeConfig) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            info!(
                max_concurrent_requests = next.max_concurrent_requests,
                delay_lo = next.request_delay.0,
                delay_hi = next.request_delay.1,
                reclaim_epoch = next.reclaim_epoch,
                "Runtime configuration updated"
            );
        }
        changed
    }

    /// Derives a new configuration from the current one and publishes it.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&RuntimeConfig) -> RuntimeConfig,
    {
        let next = f(&self.snapshot());
        self.replace(next)
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_notifies_subscribers() {
        let shared = SharedConfig::default();
        let mut rx = shared.subscribe();

        let mut next = shared.snapshot();
        next.max_concurrent_requests = 2;
        assert!(shared.replace(next.clone()));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), next);
        assert_eq!(shared.snapshot(), next);
    }

    #[test]
    fn test_identical_value_is_not_a_change() {
        let shared = SharedConfig::default();
        assert!(!shared.replace(RuntimeConfig::default()));
        assert!(!shared.update(Clone::clone));
    }

    #[test]
    fn test_clones_share_state() {
        let shared = SharedConfig::default();
        let other = shared.clone();
        shared.update(|c| RuntimeConfig {
            reclaim_epoch: c.reclaim_epoch + 1,
            ..c.clone()
        });
        assert_eq!(other.snapshot().reclaim_epoch, 1);
    }
}
