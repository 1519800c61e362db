//! CLI command implementations.

pub mod batch;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod sign;

mod services;

pub use services::Services;
