// src/storage/mod.rs
pub mod queue;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::documents::RecordType;
use crate::extractors::ExtractorVersionId;
use crate::pipeline::ExtractionResult;
use crate::registry::VersionRegistry;
use crate::utils::error::StorageError;

pub use queue::{ClassificationQueue, QueueEntry};

/// What `ResultStore::write` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// A result for this (document, version) already existed and was kept.
    AlreadyPresent,
}

/// Version-scoped, write-once store of extraction results:
/// `<root>/<record_type>/<year>/<class@version>/<doc_id>.json`.
///
/// A version only ever writes below its own directory, so work under one version
/// never touches another version's results.
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(StorageError::IoError)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, extractor: &ExtractorVersionId, year: i32, doc_id: &str) -> PathBuf {
        self.version_dir(extractor, year)
            .join(format!("{}.json", file_stem_for(doc_id)))
    }

    fn version_dir(&self, extractor: &ExtractorVersionId, year: i32) -> PathBuf {
        self.root
            .join(extractor.record_type.slug())
            .join(year.to_string())
            .join(extractor.version_ref())
    }

    /// Persists a result under its own version. Without `overwrite` an existing
    /// result is left untouched; with it, the file is replaced atomically.
    pub fn write(&self, result: &ExtractionResult, overwrite: bool) -> Result<WriteOutcome, StorageError> {
        let path = self.path_for(&result.extractor, result.year, &result.doc_id);
        if !overwrite && path.is_file() {
            return Ok(WriteOutcome::AlreadyPresent);
        }
        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let outcome = if overwrite {
            replace_atomic(&path, &json)?;
            WriteOutcome::Written
        } else {
            write_once(&path, &json)?
        };
        if outcome == WriteOutcome::Written {
            tracing::debug!("Saved result to {}", path.display());
        }
        Ok(outcome)
    }

    pub fn load(
        &self,
        extractor: &ExtractorVersionId,
        year: i32,
        doc_id: &str,
    ) -> Result<Option<ExtractionResult>, StorageError> {
        let path = self.path_for(extractor, year, doc_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::IoError(e)),
        };
        let result: ExtractionResult = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::SerializationError(format!("{}: {}", path.display(), e)))?;
        if result.doc_id != doc_id {
            return Err(StorageError::DocIdMismatch {
                path: path.display().to_string(),
                expected: doc_id.to_string(),
                found: result.doc_id,
            });
        }
        Ok(Some(result))
    }

    /// The result produced by whichever version the registry currently marks as production.
    pub fn load_current(
        &self,
        registry: &VersionRegistry,
        record_type: RecordType,
        extractor_class: &str,
        year: i32,
        doc_id: &str,
    ) -> Result<Option<ExtractionResult>, StorageError> {
        match registry.production_id(record_type, extractor_class)? {
            Some(production) => self.load(&production, year, doc_id),
            None => Ok(None),
        }
    }
}

/// Encodes a document id as a file stem, one stem per id.
///
/// ASCII letters, digits, `-` and `.` are kept (a leading `.` is not); every other
/// byte becomes `_XX` in upper-case hex, `_` included. The empty id maps to `_`,
/// which no other id can produce.
pub(crate) fn file_stem_for(id: &str) -> String {
    if id.is_empty() {
        return "_".to_string();
    }
    let mut stem = String::with_capacity(id.len());
    for (i, byte) in id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }
    stem
}

fn temp_sibling(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), nanos))
}

fn write_temp(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

/// Writes `bytes` to `path` only if nothing is there yet. Readers never see a partial file.
pub(crate) fn write_once(path: &Path, bytes: &[u8]) -> Result<WriteOutcome, StorageError> {
    let tmp = write_temp(path, bytes)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(WriteOutcome::Written),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyPresent),
        Err(e) => Err(StorageError::IoError(e)),
    }
}

/// Replaces `path` with `bytes` via rename.
pub(crate) fn replace_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = write_temp(path, bytes)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::detector::TemplateDetector;
    use crate::documents::DocumentEnvelope;
    use crate::extractors::ptr;
    use crate::fixtures::HOUSE_PTR;
    use crate::ocr::DisabledOcr;
    use crate::pipeline::Pipeline;

    fn result() -> ExtractionResult {
        let pipeline = Pipeline::new(TemplateDetector::new(0.5), Arc::new(DisabledOcr), 40);
        let envelope = DocumentEnvelope {
            doc_id: "20022419".to_string(),
            year: 2023,
            record_type: None,
        };
        pipeline
            .run(&envelope, HOUSE_PTR.as_bytes(), &ptr::house_ptr_v1_1())
            .unwrap()
    }

    #[test]
    fn results_are_keyed_by_type_year_version_and_doc() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        let result = result();
        let path = store.path_for(&result.extractor, 2023, "20022419");
        assert_eq!(
            path,
            dir.path().join("ptr").join("2023").join("house_ptr@1.1.0").join("20022419.json")
        );
        assert_eq!(
            store.path_for(&result.extractor, 2023, "../x/y").file_name().unwrap(),
            "_2E._2Fx_2Fy.json"
        );
    }

    #[test]
    fn distinct_doc_ids_never_share_a_file() {
        let ids = ["A/1", "A_1", "A 1", "A_2F1", "", "_", ".", "..", "a.b", "é"];
        let stems: std::collections::BTreeSet<String> = ids.iter().map(|id| file_stem_for(id)).collect();
        assert_eq!(stems.len(), ids.len());
        assert!(stems.iter().all(|s| !s.starts_with('.') && !s.contains('/')));

        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        let mut slash = result();
        slash.doc_id = "A/1".to_string();
        let mut underscore = slash.clone();
        underscore.doc_id = "A_1".to_string();
        underscore.aggregate_confidence = 0.25;

        assert_eq!(store.write(&slash, false).unwrap(), WriteOutcome::Written);
        assert_eq!(store.write(&underscore, false).unwrap(), WriteOutcome::Written);
        let loaded = store.load(&slash.extractor, 2023, "A_1").unwrap().unwrap();
        assert_eq!(loaded.doc_id, "A_1");
        assert_eq!(loaded.aggregate_confidence, 0.25);
    }

    #[test]
    fn load_rejects_a_file_holding_another_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        let stored = result();
        store.write(&stored, false).unwrap();
        fs::copy(
            store.path_for(&stored.extractor, 2023, &stored.doc_id),
            store.path_for(&stored.extractor, 2023, "other"),
        )
        .unwrap();
        assert!(matches!(
            store.load(&stored.extractor, 2023, "other"),
            Err(StorageError::DocIdMismatch { .. })
        ));
    }

    #[test]
    fn write_once_keeps_the_first_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        let first = result();
        assert_eq!(store.write(&first, false).unwrap(), WriteOutcome::Written);

        let mut second = first.clone();
        second.aggregate_confidence = 0.1;
        assert_eq!(store.write(&second, false).unwrap(), WriteOutcome::AlreadyPresent);
        let stored = store.load(&first.extractor, 2023, &first.doc_id).unwrap().unwrap();
        assert_eq!(stored.fields, first.fields);
        assert_ne!(stored.aggregate_confidence, 0.1);

        assert_eq!(store.write(&second, true).unwrap(), WriteOutcome::Written);
        let stored = store.load(&first.extractor, 2023, &first.doc_id).unwrap().unwrap();
        assert_eq!(stored.aggregate_confidence, 0.1);

        // No temporary files are left behind.
        let dir_entries = fs::read_dir(store.path_for(&first.extractor, 2023, "x").parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(dir_entries, 1);
    }

    #[test]
    fn versions_are_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        let newer = result();
        let mut older = newer.clone();
        older.extractor = ptr::house_ptr_v1_0().id.clone();
        older.aggregate_confidence = 0.5;

        store.write(&older, false).unwrap();
        store.write(&newer, true).unwrap();
        let kept = store.load(&older.extractor, 2023, &older.doc_id).unwrap().unwrap();
        assert_eq!(kept.aggregate_confidence, 0.5);
        assert!(store.load(&newer.extractor, 2022, &newer.doc_id).unwrap().is_none());
    }
}
