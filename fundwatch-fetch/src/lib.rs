// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `FundWatch` Fetch
//!
//! Resilient acquisition infrastructure shared by the `FundWatch` crates.
//!
//! ## Transport
//!
//! - [`gateway::CachingHttpGateway`] - Pooled client, transport retry,
//!   response cache, statistics
//! - [`cache::ResponseCache`] - SQLite-backed response store with eviction
//! - [`retry::TransportRetry`] - Inner retry for idempotent requests
//!
//! ## Recovery
//!
//! - [`recovery::FailureClassifier`] - Category and severity of a failure
//! - [`recovery::RecoveryCoordinator`] - Outer retry combinator with
//!   remediation and error history
//!
//! ## Browser Fallback
//!
//! - [`browser::FallbackBrowserFetcher`] - Reads counters from rendered pages
//! - [`browser::SessionRegistry`] - One browser session per worker
//!
//! ## Example
//!
//! ```ignore
//! use fundwatch_fetch::{CachingHttpGateway, GatewayConfig, GatewayRequest};
//!
//! let gateway = CachingHttpGateway::new(GatewayConfig::default())?;
//! let response = gateway.request(GatewayRequest::get("https://example.com")).await;
//! ```

pub mod browser;
pub mod cache;
pub mod error;
pub mod gateway;
pub mod recovery;
pub mod retry;

// Errors
pub use error::{BrowserError, FetchError};

// Transport
pub use cache::{CacheStats, CachedResponse, ResponseCache, fingerprint};
pub use gateway::{
    CachingHttpGateway, GatewayConfig, GatewayRequest, GatewayResponse, GatewayStats,
    PerformanceAnalysis, RequestBody, RequestLogEntry,
};
pub use retry::TransportRetry;

// Recovery
pub use recovery::{
    Classification, ErrorCategory, ErrorContext, ErrorRecord, ErrorReport, ErrorSeverity,
    FailureClassifier, RecoveryCoordinator, RecoveryFailure, RecoveryPolicy, RecoveryStats,
    Remediate,
};

// Browser
pub use browser::{
    BrowserBackend, BrowserSession, ChromiumBackend, FallbackBrowserFetcher, FallbackConfig,
    SessionRegistry, WorkerId,
};
