// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `FundWatch` Store
//!
//! Configuration and persistence for the `FundWatch` crates.
//!
//! - **Settings**: User settings persisted as JSON
//! - **SharedConfig**: Live runtime configuration over a watch channel
//! - **JsonRecordStore**: File-backed [`fundwatch_core::RecordSink`]
//! - **Persistence**: Atomic, owner-only JSON file helpers
//!
//! ## Usage
//!
//! ```ignore
//! use fundwatch_store::{Settings, SharedConfig};
//!
//! let settings = Settings::load_default().await?;
//! let shared = SharedConfig::new(settings.runtime_config());
//!
//! let mut rx = shared.subscribe();
//! while rx.changed().await.is_ok() {
//!     println!("now {:?}", *rx.borrow());
//! }
//! ```

pub mod error;
pub mod persistence;
pub mod record_store;
pub mod settings;
pub mod shared_config;

pub use error::StoreError;
pub use persistence::{
    default_cache_dir, default_config_dir, default_data_dir, default_records_path,
    default_settings_path, ensure_dir, load_json, load_json_or_default, save_json,
};
pub use record_store::JsonRecordStore;
pub use settings::{LogLevel, Settings};
pub use shared_config::SharedConfig;
