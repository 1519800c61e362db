//! User settings.
//!
//! A single JSON document holding the knobs of the acquisition layer. Every
//! field falls back to its default when missing, so old files keep loading.

use fundwatch_core::{DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_REQUEST_DELAY, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::persistence::{default_cache_dir, default_settings_path, load_json, save_json};

/// Name of the response cache database inside the cache directory.
const CACHE_DB_FILE: &str = "responses.db";

// ============================================================================
// Log Level
// ============================================================================

/// Default log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages.
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Everything.
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Persistent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker count for batch runs.
    pub max_concurrent_requests: usize,
    /// Pause between requests, in seconds.
    pub request_delay: (f64, f64),
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Directory of the response cache.
    pub cache_dir: PathBuf,
    /// Response cache ceiling, in MiB.
    pub cache_max_mb: u64,
    /// Response freshness window, in seconds.
    pub cache_max_age_secs: u64,
    /// Telemetry sampling interval, in seconds.
    pub monitor_interval_secs: u64,
    /// Whether the adaptive tuner runs during batches.
    pub tuning_enabled: bool,
    /// Whether zero counters trigger the browser fallback.
    pub browser_fallback: bool,
    /// Browser samples per project.
    pub browser_attempts: u32,
    /// Session token for signed requests.
    pub user_token: Option<String>,
    /// User id for signed requests.
    pub user_id: Option<String>,
    /// Default log level.
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_delay: DEFAULT_REQUEST_DELAY,
            request_timeout_secs: 30,
            cache_dir: default_cache_dir(),
            cache_max_mb: 500,
            cache_max_age_secs: 3600,
            monitor_interval_secs: 10,
            tuning_enabled: true,
            browser_fallback: true,
            browser_attempts: 3,
            user_token: None,
            user_id: None,
            log_level: LogLevel::default(),
        }
    }
}

impl Settings {
    /// Keys accepted by [`Settings::set`].
    pub const KEYS: &'static [&'static str] = &[
        "max_concurrent_requests",
        "request_delay",
        "request_timeout_secs",
        "cache_dir",
        "cache_max_mb",
        "cache_max_age_secs",
        "monitor_interval_secs",
        "tuning_enabled",
        "browser_fallback",
        "browser_attempts",
        "user_token",
        "user_id",
        "log_level",
    ];

    /// Loads settings from the default path.
    pub async fn load_default() -> Result<Self, StoreError> {
        Self::load(&default_settings_path()).await
    }

    /// Loads settings from a path. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let settings: Settings = load_json(path).await?;
        if let Err(e) = settings.validate() {
            warn!(path = %path.display(), error = %e, "Invalid settings, using defaults");
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Saves settings to a path.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.validate()?;
        save_json(path, self).await?;
        info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_concurrent_requests == 0 {
            return Err(StoreError::invalid("max_concurrent_requests", "must be at least 1"));
        }
        let (lo, hi) = self.request_delay;
        if lo < 0.0 || hi < lo {
            return Err(StoreError::invalid(
                "request_delay",
                format!("expected 0 <= lo <= hi, got ({lo}, {hi})"),
            ));
        }
        if self.browser_attempts == 0 {
            return Err(StoreError::invalid("browser_attempts", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(StoreError::invalid("request_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Sets one field from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.trim();
        let mut next = self.clone();

        match key {
            "max_concurrent_requests" => next.max_concurrent_requests = parse(key, value)?,
            "request_delay" => next.request_delay = parse_delay(value)?,
            "request_timeout_secs" => next.request_timeout_secs = parse(key, value)?,
            "cache_dir" => next.cache_dir = PathBuf::from(value),
            "cache_max_mb" => next.cache_max_mb = parse(key, value)?,
            "cache_max_age_secs" => next.cache_max_age_secs = parse(key, value)?,
            "monitor_interval_secs" => next.monitor_interval_secs = parse(key, value)?,
            "tuning_enabled" => next.tuning_enabled = parse(key, value)?,
            "browser_fallback" => next.browser_fallback = parse(key, value)?,
            "browser_attempts" => next.browser_attempts = parse(key, value)?,
            "user_token" => next.user_token = optional(value),
            "user_id" => next.user_id = optional(value),
            "log_level" => {
                next.log_level = value.parse().map_err(|e| StoreError::invalid(key, e))?;
            }
            other => return Err(StoreError::UnknownKey(other.to_string())),
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Initial runtime configuration for a batch.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            max_concurrent_requests: self.max_concurrent_requests,
            request_delay: self.request_delay,
            reclaim_epoch: 0,
        }
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Response cache database path.
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_DB_FILE)
    }

    /// Response cache ceiling, in bytes.
    pub fn cache_max_bytes(&self) -> u64 {
        self.cache_max_mb.saturating_mul(1024 * 1024)
    }

    /// Response freshness window.
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    /// Telemetry sampling interval.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, StoreError>
where
    T::Err: fmt::Display,
{
    value.parse().map_err(|e| StoreError::invalid(key, e))
}

fn parse_delay(value: &str) -> Result<(f64, f64), StoreError> {
    let parts: Vec<&str> = value
        .trim_matches(|c| c == '(' || c == ')' || c == '[' || c == ']')
        .split(',')
        .map(str::trim)
        .collect();
    match parts.as_slice() {
        [lo, hi] => Ok((parse("request_delay", lo)?, parse("request_delay", hi)?)),
        _ => Err(StoreError::invalid("request_delay", "expected 'lo,hi'")),
    }
}

fn optional(value: &str) -> Option<String> {
    match value {
        "" | "none" | "null" => None,
        v => Some(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_concurrent_requests, 5);
        assert_eq!(settings.request_delay, (1.0, 3.0));
        assert_eq!(settings.cache_max_bytes(), 500 * 1024 * 1024);
        assert_eq!(settings.cache_max_age(), Duration::from_secs(3600));
        assert!(settings.cache_db_path().ends_with("responses.db"));
        assert_eq!(settings.runtime_config(), RuntimeConfig::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"max_concurrent_requests": 2, "log_level": "debug"}"#).unwrap();
        assert_eq!(settings.max_concurrent_requests, 2);
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.browser_attempts, 3);
    }

    #[test]
    fn test_set_values() {
        let mut settings = Settings::default();
        settings.set("max_concurrent_requests", "8").unwrap();
        settings.set("request_delay", "2, 4.5").unwrap();
        settings.set("browser_fallback", "false").unwrap();
        settings.set("user_token", "abc").unwrap();
        settings.set("log_level", "WARN").unwrap();

        assert_eq!(settings.max_concurrent_requests, 8);
        assert_eq!(settings.request_delay, (2.0, 4.5));
        assert!(!settings.browser_fallback);
        assert_eq!(settings.user_token.as_deref(), Some("abc"));
        assert_eq!(settings.log_level, LogLevel::Warn);

        settings.set("user_token", "none").unwrap();
        assert!(settings.user_token.is_none());
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.set("colour", "blue"),
            Err(StoreError::UnknownKey(_))
        ));
        assert!(matches!(
            settings.set("max_concurrent_requests", "0"),
            Err(StoreError::InvalidValue { .. })
        ));
        assert!(settings.set("request_delay", "5,1").is_err());
        assert!(settings.set("browser_attempts", "many").is_err());

        // Failed updates leave the settings untouched.
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");

        let mut settings = Settings::default();
        settings.set("monitor_interval_secs", "30").unwrap();
        settings.save(&path).await.unwrap();

        let loaded = Settings::load(&path).await.unwrap();
        assert_eq!(loaded, settings);

        let missing = Settings::load(&temp.path().join("nope.json")).await.unwrap();
        assert_eq!(missing, Settings::default());
    }

    #[tokio::test]
    async fn test_invalid_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        tokio::fs::write(&path, r#"{"max_concurrent_requests": 0}"#).await.unwrap();

        assert_eq!(Settings::load(&path).await.unwrap(), Settings::default());
    }
}
