// src/storage/queue.rs
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::RecordType;
use crate::storage::{file_stem_for, replace_atomic};
use crate::utils::error::StorageError;

/// A document no template recognized, waiting for a person to classify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub doc_id: String,
    pub year: i32,
    pub record_type_hint: Option<RecordType>,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

/// Manual-classification queue, one JSON file per document.
pub struct ClassificationQueue {
    dir: PathBuf,
}

impl ClassificationQueue {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Queues a document; a later entry for the same document replaces the earlier one.
    pub fn enqueue(&self, entry: &QueueEntry) -> Result<PathBuf, StorageError> {
        let path = self.dir.join(format!("{}.json", file_stem_for(&entry.doc_id)));
        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        replace_atomic(&path, &json)?;
        tracing::info!("Queued {} for manual classification: {}", entry.doc_id, entry.reason);
        Ok(path)
    }

    /// Every queued entry, ordered by doc_id.
    pub fn list(&self) -> Result<Vec<QueueEntry>, StorageError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if !is_json || hidden {
                continue;
            }
            let raw = fs::read(&path)?;
            let entry: QueueEntry = serde_json::from_slice(&raw)
                .map_err(|e| StorageError::SerializationError(format!("{}: {}", path.display(), e)))?;
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(entries)
    }
}
