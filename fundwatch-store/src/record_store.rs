//! JSON file record sink.
//!
//! Keeps the latest snapshot per project id in memory and writes the whole
//! set to one JSON file on flush.

use fundwatch_core::{CoreError, ProjectRecord, RecordSink};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persistence::{load_json_or_default, save_json};

/// Record sink backed by a JSON file.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ProjectRecord>>,
    autosave: bool,
}

impl JsonRecordStore {
    /// Opens a store, loading existing records from `path` if present.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let existing: Vec<ProjectRecord> = load_json_or_default(&path).await;
        debug!(path = %path.display(), records = existing.len(), "Opened record store");
        let records = existing.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            path,
            records: RwLock::new(records),
            autosave: false,
        }
    }

    /// Writes the file after every stored record.
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    /// Returns the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the snapshot for an id.
    pub async fn get(&self, id: &str) -> Option<ProjectRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Returns every snapshot ordered by id.
    pub async fn all(&self) -> Vec<ProjectRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Writes all snapshots to disk.
    pub async fn save(&self) -> Result<(), StoreError> {
        let records = self.all().await;
        save_json(&self.path, &records).await?;
        info!(path = %self.path.display(), records = records.len(), "Saved records");
        Ok(())
    }
}

impl RecordSink for JsonRecordStore {
    async fn store(&self, record: &ProjectRecord) -> Result<(), CoreError> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        if self.autosave {
            self.save().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), CoreError> {
        Ok(self.save().await?)
    }
}
