//! JSON-file-backed persistence of validator runtime state (spec.md §4.3).
//!
//! Grounded on `original_source/neurons/state_store.py`: load-on-construct
//! with fallback to defaults on parse failure, copy-then-overwrite backup on
//! save. The Rust port makes the write atomic via write-to-temp + rename,
//! which spec.md §4.3 explicitly allows in place of a plain overwrite.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};

use crate::model::StateRecord;

pub struct StateStore {
    path: PathBuf,
    record: tokio::sync::Mutex<StateRecord>,
}

impl StateStore {
    /// Loads `<dir>/state_store.json`, falling back to defaults if the file
    /// is missing or unparseable.
    pub async fn open(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join("state_store.json");
        let record = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StateRecord>(&bytes) {
                Ok(record) => {
                    info!(target: "state_store", "state recovered: epoch={:?}", record.last_epoch_index);
                    record
                }
                Err(e) => {
                    warn!(target: "state_store", "could not parse state file, using defaults: {e}");
                    StateRecord::default()
                }
            },
            Err(_) => StateRecord::default(),
        };

        Self {
            path,
            record: tokio::sync::Mutex::new(record),
        }
    }

    pub async fn get_watermark(&self) -> Option<String> {
        self.record.lock().await.watermark_to_ts.clone()
    }

    pub async fn get_last_epoch(&self) -> Option<u64> {
        self.record.lock().await.last_epoch_index
    }

    pub async fn get_last_weight_block(&self) -> Option<u64> {
        self.record.lock().await.last_weight_block
    }

    pub async fn get_last_scores(&self) -> HashMap<String, f64> {
        self.record.lock().await.last_scores.clone()
    }

    /// Commits a non-chain-aligned window watermark (spec.md §4.3 "commit
    /// watermark").
    pub async fn commit_window(&self, to_ts: &str, last_scores: &HashMap<String, f64>) {
        let mut record = self.record.lock().await;
        record.watermark_to_ts = Some(to_ts.to_owned());
        record.last_scores = last_scores.clone();
        drop(record);
        self.save().await;
    }

    /// Commits a chain-aligned epoch: index, watermark, and scores
    /// (spec.md §3 invariant "last_epoch_index is strictly monotone").
    pub async fn commit_epoch(&self, epoch_index: u64, to_ts: &str, last_scores: &HashMap<String, f64>) {
        let mut record = self.record.lock().await;
        record.last_epoch_index = Some(epoch_index);
        record.watermark_to_ts = Some(to_ts.to_owned());
        record.last_scores = last_scores.clone();
        drop(record);
        self.save().await;
    }

    pub async fn set_last_weight_block(&self, block: u64) {
        self.record.lock().await.last_weight_block = Some(block);
        self.save().await;
    }

    async fn save(&self) {
        let mut record = self.record.lock().await;
        record.last_saved_at = Some(Utc::now().timestamp() as f64);
        let record_snapshot = record.clone();
        drop(record);

        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(target: "state_store", "failed to create state directory: {e}");
                return;
            }
        }

        if tokio::fs::metadata(&self.path).await.is_ok() {
            let backup_path = self.path.with_extension("json.backup");
            if let Err(e) = tokio::fs::copy(&self.path, &backup_path).await {
                warn!(target: "state_store", "failed to write backup: {e}");
            }
        }

        let bytes = match serde_json::to_vec_pretty(&record_snapshot) {
            Ok(b) => b,
            Err(e) => {
                warn!(target: "state_store", "failed to serialize state: {e}");
                return;
            }
        };

        let tmp_path = self.path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
            warn!(target: "state_store", "failed to write state: {e}");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            warn!(target: "state_store", "failed to commit state file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).await;
        assert_eq!(store.get_last_epoch().await, None);
        assert_eq!(store.get_watermark().await, None);
    }

    #[tokio::test]
    async fn commit_epoch_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).await;
        let mut scores = HashMap::new();
        scores.insert("A".to_owned(), 0.5);
        store.commit_epoch(3, "2026-01-01T00:00:00Z", &scores).await;

        let reloaded = StateStore::open(dir.path()).await;
        assert_eq!(reloaded.get_last_epoch().await, Some(3));
        assert_eq!(
            reloaded.get_watermark().await,
            Some("2026-01-01T00:00:00Z".to_owned())
        );
        assert_eq!(reloaded.get_last_scores().await.get("A"), Some(&0.5));
    }

    #[tokio::test]
    async fn epoch_index_never_decreases_when_committed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).await;
        store.commit_epoch(1, "t1", &HashMap::new()).await;
        store.commit_epoch(2, "t2", &HashMap::new()).await;
        assert_eq!(store.get_last_epoch().await, Some(2));
    }

    #[tokio::test]
    async fn backup_file_created_on_second_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).await;
        store.commit_epoch(1, "t1", &HashMap::new()).await;
        store.commit_epoch(2, "t2", &HashMap::new()).await;
        assert!(dir.path().join("state_store.json.backup").exists());
    }
}
