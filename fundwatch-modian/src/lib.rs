// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `FundWatch` Modian
//!
//! Acquisition of modian.com crowdfunding projects.
//!
//! - [`signing`] - Keyed MD5 request signatures
//! - [`parser`] - JSONP envelopes and record transformation
//! - [`SignedRequestClient`] - Probe + detail lookup over the shared gateway
//! - [`ProjectFetcher`] - API path under recovery, browser fallback for
//!   zero counters
//! - [`BatchRunner`] - Bounded worker pool feeding a record sink
//!
//! ## Usage
//!
//! ```ignore
//! use fundwatch_modian::{ClientConfig, SignedRequestClient};
//!
//! let client = SignedRequestClient::new(gateway, ClientConfig::default());
//! let record = client.get_project_data("123456").await;
//! println!("{} raised {:.2}", record.name, record.raised_amount);
//! ```

pub mod api;
pub mod batch;
pub mod fetcher;
pub mod parser;
pub mod signing;

#[cfg(test)]
mod test_support;

pub use api::{ClientConfig, ClientStats, Identity, SignedRequestClient, WEB_BASE_URL};
pub use batch::{BatchReport, BatchRunner};
pub use fetcher::ProjectFetcher;
pub use signing::{API_BASE_URL, APP_KEY, SignedRequest, current_mt, sign};
