//! File persistence helpers.
//!
//! Settings and record snapshots are written as JSON, atomically, and
//! readable by the owner only.

use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;

const APP_DIR: &str = "fundwatch";

// ============================================================================
// Default Paths
// ============================================================================

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Returns the configuration directory, e.g. `~/.config/fundwatch`.
pub fn default_config_dir() -> PathBuf {
    app_dir(dirs::config_dir())
}

/// Returns the cache directory, e.g. `~/.cache/fundwatch`.
pub fn default_cache_dir() -> PathBuf {
    app_dir(dirs::cache_dir())
}

/// Returns the data directory, e.g. `~/.local/share/fundwatch`.
pub fn default_data_dir() -> PathBuf {
    app_dir(dirs::data_dir())
}

/// Returns the settings file path.
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}

/// Returns the record snapshot file path.
pub fn default_records_path() -> PathBuf {
    default_data_dir().join("records.json")
}

// ============================================================================
// Permissions
// ============================================================================

#[cfg(unix)]
async fn restrict(path: &Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(mode);
    tokio::fs::set_permissions(path, perms).await?;
    debug!(path = %path.display(), mode = format!("{mode:o}"), "Restricted permissions");
    Ok(())
}

#[cfg(not(unix))]
async fn restrict(_path: &Path, _mode: u32) -> Result<(), StoreError> {
    Ok(())
}

// ============================================================================
// File Operations
// ============================================================================

/// Saves data as pretty JSON.
///
/// Parent directories are created (0o700), the write goes through a temp
/// file and a rename, and the result is 0o600.
pub async fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    debug!(path = %path.display(), "Saving JSON file");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent).await?;
        }
    }

    let json = serde_json::to_string_pretty(data)?;

    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, &json).await?;
    tokio::fs::rename(&temp_path, path).await?;

    restrict(path, 0o600).await?;
    Ok(())
}

/// Loads data from a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    debug!(path = %path.display(), "Loading JSON file");
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Loads data from a JSON file, falling back to the default.
///
/// A missing file is silent; a corrupt one is logged.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path).await {
        Ok(data) => data,
        Err(e) => {
            if !matches!(e, StoreError::Io(_)) {
                warn!(path = %path.display(), error = %e, "Failed to load, using defaults");
            }
            T::default()
        }
    }
}

/// Creates a directory (0o700) if it does not exist.
pub async fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        debug!(path = %path.display(), "Creating directory");
        tokio::fs::create_dir_all(path).await?;
        restrict(path, 0o700).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_default_paths() {
        assert!(default_settings_path().ends_with("fundwatch/settings.json"));
        assert!(default_records_path().ends_with("fundwatch/records.json"));
        assert!(default_cache_dir().ends_with("fundwatch"));
    }

    #[tokio::test]
    async fn test_roundtrip_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("b").join("sample.json");
        let sample = Sample {
            name: "demo".into(),
            count: 3,
        };

        save_json(&path, &sample).await.unwrap();
        let loaded: Sample = load_json(&path).await.unwrap();

        assert_eq!(loaded, sample);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_default() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.json");
        let loaded: Sample = load_json_or_default(&missing).await;
        assert_eq!(loaded, Sample::default());

        let corrupt = temp.path().join("corrupt.json");
        tokio::fs::write(&corrupt, "{not json").await.unwrap();
        let loaded: Sample = load_json_or_default(&corrupt).await;
        assert_eq!(loaded, Sample::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secret.json");
        save_json(&path, &Sample::default()).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
