//! Request-level counters fed into the monitor.

use async_trait::async_trait;
use std::sync::Arc;

use fundwatch_fetch::{CachingHttpGateway, RecoveryCoordinator};

/// Cumulative request counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkloadCounters {
    /// Requests issued so far.
    pub requests: u64,
    /// Failures recorded so far.
    pub errors: u64,
    /// Smoothed response time, in seconds.
    pub avg_response_time: f64,
}

/// Anything that reports cumulative request counters.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Returns the current counters.
    async fn counters(&self) -> WorkloadCounters;
}

/// Requests and latency from the gateway, failures from the recovery layer.
pub struct FetchWorkload {
    gateway: Arc<CachingHttpGateway>,
    recovery: Arc<RecoveryCoordinator>,
}

impl FetchWorkload {
    /// Creates a workload source.
    pub fn new(gateway: Arc<CachingHttpGateway>, recovery: Arc<RecoveryCoordinator>) -> Self {
        Self { gateway, recovery }
    }
}

#[async_trait]
impl WorkloadSource for FetchWorkload {
    async fn counters(&self) -> WorkloadCounters {
        let gateway = self.gateway.stats().await;
        let recovery = self.recovery.stats().await;
        WorkloadCounters {
            requests: gateway.total_requests,
            errors: recovery.total_errors,
            avg_response_time: gateway.avg_response_time,
        }
    }
}
