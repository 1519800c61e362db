// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `FundWatch` Core
//!
//! Core types, models, and traits for the `FundWatch` crates.
//!
//! ## Key Types
//!
//! - [`ProjectRecord`] - Immutable snapshot of one crowdfunding project
//! - [`RewardTier`] - Visible reward level
//! - [`CounterSample`] - Likes/comments read from the rendered page
//! - [`FetchSource`] - Which path produced a record
//! - [`RuntimeConfig`] - Knobs shared by the batch runner and the tuner
//!
//! ## Traits
//!
//! - [`ProjectSource`] - Produces records by id
//! - [`RecordSink`] - Persists records

pub mod error;
pub mod models;
pub mod traits;

pub use error::CoreError;

pub use models::{
    CounterSample, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_REQUEST_DELAY, FetchSource,
    ProjectRecord, RewardTier, RuntimeConfig, UNKNOWN_STATUS, completion_rate,
};

pub use traits::{ProjectSource, RecordSink};
