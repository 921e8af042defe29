// src/documents/source.rs
use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::documents::models::{DocumentEnvelope, RecordType};
use crate::utils::error::SourceError;

/// The acquisition side of the engine: which documents exist and their bytes.
/// Documents are referenced, never mutated.
pub trait DocumentSource: Send + Sync {
    /// Envelopes of every document filed in `years` that is, or may be, of `record_type`,
    /// ordered by (year, doc_id). Documents without a record type are included; their
    /// type is left to the detector.
    fn select(
        &self,
        record_type: RecordType,
        years: RangeInclusive<i32>,
    ) -> Result<Vec<DocumentEnvelope>, SourceError>;

    /// Raw bytes of one document.
    fn load(&self, doc_id: &str) -> Result<Vec<u8>, SourceError>;
}

/// One row of `catalog.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub envelope: DocumentEnvelope,
    /// Path relative to the catalog directory.
    pub file: PathBuf,
}

/// Reads documents from a directory holding `catalog.json` plus the files it lists.
pub struct FsDocumentSource {
    root: PathBuf,
    entries: BTreeMap<String, CatalogEntry>,
}

impl FsDocumentSource {
    pub const CATALOG_FILE: &'static str = "catalog.json";

    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        let catalog_path = root.join(Self::CATALOG_FILE);
        let raw = fs::read_to_string(&catalog_path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Catalog(format!("{}: {}", catalog_path.display(), e)))?;

        let mut by_id = BTreeMap::new();
        for entry in entries {
            let doc_id = entry.envelope.doc_id.clone();
            if by_id.insert(doc_id.clone(), entry).is_some() {
                return Err(SourceError::Catalog(format!("duplicate doc_id '{}'", doc_id)));
            }
        }
        tracing::info!("Loaded document catalog with {} entries from {}", by_id.len(), root.display());

        Ok(Self { root, entries: by_id })
    }

    pub fn envelope(&self, doc_id: &str) -> Option<&DocumentEnvelope> {
        self.entries.get(doc_id).map(|entry| &entry.envelope)
    }
}

impl DocumentSource for FsDocumentSource {
    fn select(
        &self,
        record_type: RecordType,
        years: RangeInclusive<i32>,
    ) -> Result<Vec<DocumentEnvelope>, SourceError> {
        Ok(sorted_selection(
            self.entries.values().map(|entry| &entry.envelope),
            record_type,
            years,
        ))
    }

    fn load(&self, doc_id: &str) -> Result<Vec<u8>, SourceError> {
        let entry = self
            .entries
            .get(doc_id)
            .ok_or_else(|| SourceError::NotFound(doc_id.to_string()))?;
        Ok(fs::read(self.root.join(&entry.file))?)
    }
}

/// Holds documents in memory; used by tests and by callers that already have the bytes.
#[derive(Default)]
pub struct MemoryDocumentSource {
    documents: BTreeMap<String, (DocumentEnvelope, Vec<u8>)>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, envelope: DocumentEnvelope, bytes: impl Into<Vec<u8>>) {
        self.documents
            .insert(envelope.doc_id.clone(), (envelope, bytes.into()));
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentSource for MemoryDocumentSource {
    fn select(
        &self,
        record_type: RecordType,
        years: RangeInclusive<i32>,
    ) -> Result<Vec<DocumentEnvelope>, SourceError> {
        Ok(sorted_selection(
            self.documents.values().map(|(envelope, _)| envelope),
            record_type,
            years,
        ))
    }

    fn load(&self, doc_id: &str) -> Result<Vec<u8>, SourceError> {
        self.documents
            .get(doc_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SourceError::NotFound(doc_id.to_string()))
    }
}

fn sorted_selection<'a>(
    envelopes: impl Iterator<Item = &'a DocumentEnvelope>,
    record_type: RecordType,
    years: RangeInclusive<i32>,
) -> Vec<DocumentEnvelope> {
    let mut selected: Vec<DocumentEnvelope> = envelopes
        .filter(|envelope| {
            envelope.record_type.map_or(true, |t| t == record_type) && years.contains(&envelope.year)
        })
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.doc_id.cmp(&b.doc_id)));
    selected
}
