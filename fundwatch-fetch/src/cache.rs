//! Persistent response cache.
//!
//! Entries live in a small SQLite database keyed by a request fingerprint.
//! Reads honour a caller-supplied max age and purge stale rows; writes keep
//! the total size under a ceiling by dropping the oldest rows until usage is
//! back under 80% of it.

use chrono::{DateTime, TimeZone, Utc};
use md5::{Digest, Md5};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::FetchError;

/// Default cache ceiling (500 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// Default max age for cached responses.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Fraction of the ceiling that eviction drains down to.
const EVICTION_TARGET: f64 = 0.8;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS responses (
    key         TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    content     BLOB NOT NULL,
    status      INTEGER NOT NULL,
    headers     TEXT NOT NULL,
    size        INTEGER NOT NULL,
    captured_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS responses_captured_at ON responses (captured_at);
";

// ============================================================================
// Fingerprint
// ============================================================================

/// Computes the cache key for a request.
///
/// The key is the MD5 of `{"headers":..,"params":..,"url":..}` with every map
/// in sorted key order, so insertion order never changes it.
pub fn fingerprint(
    url: &str,
    headers: &BTreeMap<String, String>,
    params: &BTreeMap<String, String>,
) -> String {
    let payload = serde_json::json!({
        "url": url,
        "headers": headers,
        "params": params,
    });
    let digest = Md5::digest(payload.to_string().as_bytes());
    format!("{digest:x}")
}

// ============================================================================
// Entries
// ============================================================================

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Raw body bytes.
    pub content: Vec<u8>,
    /// HTTP status.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// When the response was stored.
    pub captured_at: DateTime<Utc>,
}

/// Cache usage figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of stored entries.
    pub entries: u64,
    /// Sum of entry sizes in bytes.
    pub total_bytes: u64,
    /// Configured ceiling in bytes.
    pub max_bytes: u64,
}

// ============================================================================
// Response Cache
// ============================================================================

/// SQLite-backed response cache.
#[derive(Debug)]
pub struct ResponseCache {
    conn: Mutex<Connection>,
    max_bytes: u64,
}

impl ResponseCache {
    /// Opens (or creates) a cache database at `path`.
    pub fn open(path: &Path, max_bytes: u64) -> Result<Self, FetchError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), max_bytes, "Opened response cache");
        Ok(Self {
            conn: Mutex::new(conn),
            max_bytes,
        })
    }

    /// Creates a cache that lives only in memory.
    pub fn in_memory(max_bytes: u64) -> Result<Self, FetchError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_bytes,
        })
    }

    /// Returns the configured ceiling.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up an entry no older than `max_age`.
    ///
    /// An expired entry counts as a miss and is deleted.
    pub fn get(&self, key: &str, max_age: Duration) -> Result<Option<CachedResponse>, FetchError> {
        self.get_at(key, max_age, Utc::now())
    }

    fn get_at(
        &self,
        key: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResponse>, FetchError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT content, status, headers, captured_at FROM responses WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((content, status, headers, captured_ms)) = row else {
            return Ok(None);
        };

        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if now.timestamp_millis() - captured_ms > max_age_ms {
            conn.execute("DELETE FROM responses WHERE key = ?1", params![key])?;
            debug!(key, "Cache entry expired");
            return Ok(None);
        }

        let headers: BTreeMap<String, String> = match serde_json::from_str(&headers) {
            Ok(h) => h,
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable cache entry");
                conn.execute("DELETE FROM responses WHERE key = ?1", params![key])?;
                return Ok(None);
            }
        };

        let captured_at = Utc
            .timestamp_millis_opt(captured_ms)
            .single()
            .unwrap_or(now);

        Ok(Some(CachedResponse {
            content,
            status,
            headers,
            captured_at,
        }))
    }

    /// Stores an entry and evicts old ones if the ceiling is exceeded.
    pub fn set(
        &self,
        key: &str,
        url: &str,
        content: &[u8],
        status: u16,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), FetchError> {
        self.set_at(key, url, content, status, headers, Utc::now())
    }

    fn set_at(
        &self,
        key: &str,
        url: &str,
        content: &[u8],
        status: u16,
        headers: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<(), FetchError> {
        let headers_json = serde_json::to_string(headers)?;
        let size = (content.len() + headers_json.len()) as u64;

        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO responses (key, url, content, status, headers, size, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key,
                url,
                content,
                status,
                headers_json,
                i64::try_from(size).unwrap_or(i64::MAX),
                now.timestamp_millis()
            ],
        )?;
        debug!(key, url, size, "Cached response");

        Self::evict_if_needed(&conn, self.max_bytes)?;
        Ok(())
    }

    fn total_bytes(conn: &Connection) -> Result<u64, FetchError> {
        let total: i64 =
            conn.query_row("SELECT COALESCE(SUM(size), 0) FROM responses", [], |row| row.get(0))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn evict_if_needed(conn: &Connection, max_bytes: u64) -> Result<usize, FetchError> {
        let mut total = Self::total_bytes(conn)?;
        if total <= max_bytes {
            return Ok(0);
        }

        let target = (max_bytes as f64 * EVICTION_TARGET) as u64;
        let victims: Vec<(String, u64)> = {
            let mut stmt =
                conn.prepare("SELECT key, size FROM responses ORDER BY captured_at ASC, rowid ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut victims = Vec::new();
            for row in rows {
                if total <= target {
                    break;
                }
                let (key, size) = row?;
                let size = u64::try_from(size).unwrap_or(0);
                total = total.saturating_sub(size);
                victims.push((key, size));
            }
            victims
        };

        for (key, _) in &victims {
            conn.execute("DELETE FROM responses WHERE key = ?1", params![key])?;
        }

        info!(evicted = victims.len(), remaining_bytes = total, "Evicted cache entries");
        Ok(victims.len())
    }

    /// Deletes every entry older than `max_age`. Returns the number removed.
    pub fn purge_expired(&self, max_age: Duration) -> Result<usize, FetchError> {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(max_age_ms);
        let removed = self
            .conn()
            .execute("DELETE FROM responses WHERE captured_at < ?1", params![cutoff])?;
        if removed > 0 {
            debug!(removed, "Purged expired cache entries");
        }
        Ok(removed)
    }

    /// Removes every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize, FetchError> {
        let removed = self.conn().execute("DELETE FROM responses", [])?;
        info!(removed, "Cleared response cache");
        Ok(removed)
    }

    /// Returns usage figures.
    pub fn stats(&self) -> Result<CacheStats, FetchError> {
        let conn = self.conn();
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM responses", [], |row| row.get(0))?;
        Ok(CacheStats {
            entries: u64::try_from(entries).unwrap_or(0),
            total_bytes: Self::total_bytes(&conn)?,
            max_bytes: self.max_bytes,
        })
    }

    /// Returns true if an entry exists for `key`, regardless of age.
    pub fn contains(&self, key: &str) -> Result<bool, FetchError> {
        let found: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM responses WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn headers() -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("content-type".to_string(), "application/json".to_string());
        h
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        let empty = BTreeMap::new();
        assert_eq!(fingerprint("https://x/y", &empty, &a), fingerprint("https://x/y", &empty, &b));
        assert_ne!(fingerprint("https://x/y", &empty, &a), fingerprint("https://x/z", &empty, &a));
        assert_eq!(fingerprint("u", &empty, &empty).len(), 32);
    }

    #[test]
    fn test_write_then_read_within_ttl() {
        let cache = ResponseCache::in_memory(DEFAULT_MAX_BYTES).unwrap();
        cache.set("k", "https://x", b"hello", 200, &headers()).unwrap();

        let hit = cache.get("k", DEFAULT_MAX_AGE).unwrap().unwrap();
        assert_eq!(hit.content, b"hello");
        assert_eq!(hit.status, 200);
        assert_eq!(hit.headers, headers());
    }

    #[test]
    fn test_expired_read_is_miss_and_purges() {
        let cache = ResponseCache::in_memory(DEFAULT_MAX_BYTES).unwrap();
        let old = Utc::now() - ChronoDuration::seconds(7200);
        cache.set_at("k", "https://x", b"stale", 200, &headers(), old).unwrap();

        assert!(cache.contains("k").unwrap());
        assert!(cache.get("k", DEFAULT_MAX_AGE).unwrap().is_none());
        assert!(!cache.contains("k").unwrap());
    }

    #[test]
    fn test_eviction_drains_oldest_first_to_eighty_percent() {
        let cache = ResponseCache::in_memory(1000).unwrap();
        let empty = BTreeMap::new();
        let body = vec![b'x'; 198]; // 198 + "{}" = 200 bytes per entry
        let base = Utc::now() - ChronoDuration::seconds(100);

        for i in 0..5 {
            let at = base + ChronoDuration::seconds(i);
            cache.set_at(&format!("k{i}"), "u", &body, 200, &empty, at).unwrap();
        }
        assert_eq!(cache.stats().unwrap().total_bytes, 1000);

        // Sixth entry pushes usage to 1200; drain to <= 800.
        cache
            .set_at("k5", "u", &body, 200, &empty, base + ChronoDuration::seconds(5))
            .unwrap();

        let stats = cache.stats().unwrap();
        assert!(stats.total_bytes <= 800);
        assert!(!cache.contains("k0").unwrap());
        assert!(!cache.contains("k1").unwrap());
        assert!(cache.contains("k2").unwrap());
        assert!(cache.contains("k5").unwrap());
    }

    #[test]
    fn test_clear_and_purge() {
        let cache = ResponseCache::in_memory(DEFAULT_MAX_BYTES).unwrap();
        let old = Utc::now() - ChronoDuration::seconds(7200);
        cache.set_at("old", "u", b"a", 200, &headers(), old).unwrap();
        cache.set("new", "u", b"b", 200, &headers()).unwrap();

        assert_eq!(cache.purge_expired(DEFAULT_MAX_AGE).unwrap(), 1);
        assert_eq!(cache.stats().unwrap().entries, 1);
        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        {
            let cache = ResponseCache::open(&path, DEFAULT_MAX_BYTES).unwrap();
            cache.set("k", "u", b"persisted", 200, &BTreeMap::new()).unwrap();
        }
        let reopened = ResponseCache::open(&path, DEFAULT_MAX_BYTES).unwrap();
        let hit = reopened.get("k", DEFAULT_MAX_AGE).unwrap().unwrap();
        assert_eq!(hit.content, b"persisted");
    }
}
