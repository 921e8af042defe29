// src/registry/store.rs
//! Persistence for registry records. Versions are written once and then only
//! updated in place by review and retirement. Version updates and pointer writes
//! are both conditional on the revision the writer last read.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::RecordType;
use crate::extractors::ExtractorVersionId;
use crate::registry::models::{ExtractorVersion, ProductionPointer};
use crate::storage::{replace_atomic, write_once, WriteOutcome};
use crate::utils::error::{RegistryError, StorageError};

pub trait RegistryStore: Send + Sync {
    fn get_version(&self, id: &ExtractorVersionId) -> Result<Option<ExtractorVersion>, RegistryError>;

    /// Stores a new version; fails with `AlreadyDeployed` if the id exists.
    fn create_version(&self, version: &ExtractorVersion) -> Result<(), RegistryError>;

    /// Replaces an existing version record only if the stored one is still at `expected_revision`.
    fn update_version(&self, next: &ExtractorVersion, expected_revision: u64) -> Result<(), RegistryError>;

    /// Every version of one (record type, extractor class) pair, in no particular order.
    fn list_versions(
        &self,
        record_type: RecordType,
        extractor_class: &str,
    ) -> Result<Vec<ExtractorVersion>, RegistryError>;

    /// The current pointer, or an empty one at revision 0.
    fn read_pointer(&self, record_type: RecordType, extractor_class: &str) -> Result<ProductionPointer, RegistryError>;

    /// Stores `next` only if the stored pointer is still at `expected_revision`.
    fn write_pointer(&self, next: &ProductionPointer, expected_revision: u64) -> Result<(), RegistryError>;
}

fn conflict(pointer: &ProductionPointer, expected: u64, found: u64) -> RegistryError {
    RegistryError::ConcurrentPromotionConflict {
        record_type: pointer.record_type,
        extractor_class: pointer.extractor_class.clone(),
        expected,
        found,
    }
}

fn version_conflict(version: &ExtractorVersion, expected: u64, found: u64) -> RegistryError {
    RegistryError::ConcurrentUpdateConflict {
        version: version.id.to_string(),
        expected,
        found,
    }
}

fn storage_to_registry(e: StorageError) -> RegistryError {
    match e {
        StorageError::IoError(e) => RegistryError::from(e),
        other => RegistryError::Io(other.to_string()),
    }
}

/// Filesystem layout:
/// `<root>/<record_type>/<class>/versions/<x.y.z>.json`, `pointer.json` and,
/// while a write is in progress, `pointer.lock` or `versions/<x.y.z>.lock`.
pub struct FsRegistryStore {
    root: PathBuf,
}

impl FsRegistryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn pair_dir(&self, record_type: RecordType, extractor_class: &str) -> PathBuf {
        self.root.join(record_type.slug()).join(extractor_class)
    }

    fn version_path(&self, id: &ExtractorVersionId) -> PathBuf {
        self.pair_dir(id.record_type, &id.extractor_class)
            .join("versions")
            .join(format!("{}.json", id.version))
    }

    fn pointer_path(&self, record_type: RecordType, extractor_class: &str) -> PathBuf {
        self.pair_dir(record_type, extractor_class).join("pointer.json")
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, RegistryError> {
        match fs::read(path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Locks older than this are reported as stale rather than held.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(10 * 60);

/// Contents of a lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Exclusive lock on one registry record, released on drop.
struct RecordLock {
    path: PathBuf,
}

impl RecordLock {
    /// Takes the lock at `path`. A fresh lock held by someone else yields `held()`;
    /// one older than `STALE_LOCK_AFTER` yields `StaleLock`.
    fn acquire(path: PathBuf, held: impl FnOnce() -> RegistryError) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let lock = Self { path };
                let holder = LockHolder {
                    pid: std::process::id(),
                    acquired_at: Utc::now(),
                };
                serde_json::to_writer(&mut file, &holder)?;
                Ok(lock)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(stale_lock(&path).unwrap_or_else(held)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release registry lock {}: {}", self.path.display(), e);
        }
    }
}

/// `StaleLock` for a lock taken more than `STALE_LOCK_AFTER` ago. Lock files without
/// a readable holder are dated by their modification time.
fn stale_lock(path: &Path) -> Option<RegistryError> {
    let holder: Option<LockHolder> = fs::read(path)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok());
    let acquired_at = match &holder {
        Some(holder) => holder.acquired_at,
        None => DateTime::<Utc>::from(fs::metadata(path).ok()?.modified().ok()?),
    };
    let age = Utc::now().signed_duration_since(acquired_at).to_std().ok()?;
    if age < STALE_LOCK_AFTER {
        return None;
    }
    let holder = match holder {
        Some(holder) => format!("pid {} at {}", holder.pid, holder.acquired_at.to_rfc3339()),
        None => format!("an unknown writer at {}", acquired_at.to_rfc3339()),
    };
    tracing::warn!("Stale registry lock {} ({})", path.display(), holder);
    Some(RegistryError::StaleLock {
        path: path.display().to_string(),
        holder,
    })
}

impl RegistryStore for FsRegistryStore {
    fn get_version(&self, id: &ExtractorVersionId) -> Result<Option<ExtractorVersion>, RegistryError> {
        Self::read_json(&self.version_path(id))
    }

    fn create_version(&self, version: &ExtractorVersion) -> Result<(), RegistryError> {
        let json = serde_json::to_vec_pretty(version)?;
        match write_once(&self.version_path(&version.id), &json).map_err(storage_to_registry)? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::AlreadyPresent => Err(RegistryError::AlreadyDeployed(version.id.to_string())),
        }
    }

    fn update_version(&self, next: &ExtractorVersion, expected_revision: u64) -> Result<(), RegistryError> {
        let path = self.version_path(&next.id);
        let _lock = RecordLock::acquire(path.with_extension("lock"), || {
            RegistryError::RecordLocked(next.id.to_string())
        })?;

        let current: ExtractorVersion =
            Self::read_json(&path)?.ok_or_else(|| RegistryError::UnknownVersion(next.id.to_string()))?;
        if current.revision != expected_revision {
            return Err(version_conflict(next, expected_revision, current.revision));
        }
        replace_atomic(&path, &serde_json::to_vec_pretty(next)?)?;
        Ok(())
    }

    fn list_versions(
        &self,
        record_type: RecordType,
        extractor_class: &str,
    ) -> Result<Vec<ExtractorVersion>, RegistryError> {
        let dir = self.pair_dir(record_type, extractor_class).join("versions");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let visible = path
                .file_name()
                .map(|n| !n.to_string_lossy().starts_with('.'))
                .unwrap_or(false);
            if visible && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                if let Some(version) = Self::read_json(&path)? {
                    versions.push(version);
                }
            }
        }
        Ok(versions)
    }

    fn read_pointer(&self, record_type: RecordType, extractor_class: &str) -> Result<ProductionPointer, RegistryError> {
        Ok(Self::read_json(&self.pointer_path(record_type, extractor_class))?
            .unwrap_or_else(|| ProductionPointer::empty(record_type, extractor_class)))
    }

    fn write_pointer(&self, next: &ProductionPointer, expected_revision: u64) -> Result<(), RegistryError> {
        let pointer_path = self.pointer_path(next.record_type, &next.extractor_class);
        let _lock = RecordLock::acquire(pointer_path.with_file_name("pointer.lock"), || {
            RegistryError::PointerLocked {
                record_type: next.record_type,
                extractor_class: next.extractor_class.clone(),
            }
        })?;

        let current = self.read_pointer(next.record_type, &next.extractor_class)?;
        if current.revision != expected_revision {
            return Err(conflict(next, expected_revision, current.revision));
        }
        replace_atomic(&pointer_path, &serde_json::to_vec_pretty(next)?)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    versions: BTreeMap<ExtractorVersionId, ExtractorVersion>,
    pointers: BTreeMap<(RecordType, String), ProductionPointer>,
}

/// In-process store; records keep exact values (no serialization round trip).
#[derive(Default)]
pub struct MemoryRegistryStore {
    state: Mutex<MemoryState>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn get_version(&self, id: &ExtractorVersionId) -> Result<Option<ExtractorVersion>, RegistryError> {
        Ok(self.state().versions.get(id).cloned())
    }

    fn create_version(&self, version: &ExtractorVersion) -> Result<(), RegistryError> {
        let mut state = self.state();
        if state.versions.contains_key(&version.id) {
            return Err(RegistryError::AlreadyDeployed(version.id.to_string()));
        }
        state.versions.insert(version.id.clone(), version.clone());
        Ok(())
    }

    fn update_version(&self, next: &ExtractorVersion, expected_revision: u64) -> Result<(), RegistryError> {
        let mut state = self.state();
        match state.versions.get_mut(&next.id) {
            Some(stored) if stored.revision != expected_revision => {
                Err(version_conflict(next, expected_revision, stored.revision))
            }
            Some(stored) => {
                *stored = next.clone();
                Ok(())
            }
            None => Err(RegistryError::UnknownVersion(next.id.to_string())),
        }
    }

    fn list_versions(
        &self,
        record_type: RecordType,
        extractor_class: &str,
    ) -> Result<Vec<ExtractorVersion>, RegistryError> {
        Ok(self
            .state()
            .versions
            .values()
            .filter(|v| v.id.record_type == record_type && v.id.extractor_class == extractor_class)
            .cloned()
            .collect())
    }

    fn read_pointer(&self, record_type: RecordType, extractor_class: &str) -> Result<ProductionPointer, RegistryError> {
        Ok(self
            .state()
            .pointers
            .get(&(record_type, extractor_class.to_string()))
            .cloned()
            .unwrap_or_else(|| ProductionPointer::empty(record_type, extractor_class)))
    }

    fn write_pointer(&self, next: &ProductionPointer, expected_revision: u64) -> Result<(), RegistryError> {
        let mut state = self.state();
        let key = (next.record_type, next.extractor_class.clone());
        let found = state.pointers.get(&key).map(|p| p.revision).unwrap_or(0);
        if found != expected_revision {
            return Err(conflict(next, expected_revision, found));
        }
        state.pointers.insert(key, next.clone());
        Ok(())
    }
}
