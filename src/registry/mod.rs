// src/registry/mod.rs
//! Version registry: the deployment history of every extractor version and one
//! production pointer per (record type, extractor class).
//!
//! Stage machine: `Deployed -> UnderReview -> {Production | Retired}`. Which version
//! is `Production` is read from the pointer, so there is never more than one.
//! A version that has been production and is no longer is reported as `Retired`.
//! Promotion and rollback only rewrite the pointer.

pub mod models;
pub mod store;

use std::sync::Arc;

use chrono::Utc;

use crate::documents::RecordType;
use crate::extractors::{ExtractorVersionId, SemVer};
use crate::orchestrator::comparison::ComparisonReport;
use crate::quality::QualityMetrics;
use crate::utils::error::RegistryError;

pub use models::{ExtractorVersion, PointerAction, PointerChange, ProductionPointer, VersionStage};
pub use store::{FsRegistryStore, MemoryRegistryStore, RegistryStore};

pub struct VersionRegistry {
    store: Arc<dyn RegistryStore>,
}

impl VersionRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRegistryStore::new()))
    }

    /// Registers a new version in `Deployed`.
    pub fn deploy(&self, id: ExtractorVersionId, changelog: &str) -> Result<ExtractorVersion, RegistryError> {
        let version = ExtractorVersion {
            id,
            deployed_at: Utc::now(),
            changelog: changelog.to_string(),
            stage: VersionStage::Deployed,
            is_production: false,
            quality_metrics: None,
            comparison: None,
            reviewed_at: None,
            revision: 0,
        };
        self.store.create_version(&version)?;
        tracing::info!("Deployed extractor version {}", version.id);
        Ok(version)
    }

    /// A version with its stage resolved against the production pointer.
    pub fn get(&self, id: &ExtractorVersionId) -> Result<ExtractorVersion, RegistryError> {
        let version = self
            .store
            .get_version(id)?
            .ok_or_else(|| RegistryError::UnknownVersion(id.to_string()))?;
        let pointer = self.store.read_pointer(id.record_type, &id.extractor_class)?;
        Ok(resolve_stage(version, &pointer))
    }

    pub fn pointer(&self, record_type: RecordType, extractor_class: &str) -> Result<ProductionPointer, RegistryError> {
        self.store.read_pointer(record_type, extractor_class)
    }

    pub fn production_id(
        &self,
        record_type: RecordType,
        extractor_class: &str,
    ) -> Result<Option<ExtractorVersionId>, RegistryError> {
        Ok(self.store.read_pointer(record_type, extractor_class)?.production_id())
    }

    pub fn production(
        &self,
        record_type: RecordType,
        extractor_class: &str,
    ) -> Result<Option<ExtractorVersion>, RegistryError> {
        match self.production_id(record_type, extractor_class)? {
            Some(id) => Ok(Some(self.get(&id)?)),
            None => Ok(None),
        }
    }

    /// Deployment history of one pair, ordered by deployment time, then version.
    pub fn list_versions(
        &self,
        record_type: RecordType,
        extractor_class: &str,
    ) -> Result<Vec<ExtractorVersion>, RegistryError> {
        let pointer = self.store.read_pointer(record_type, extractor_class)?;
        let mut versions: Vec<ExtractorVersion> = self
            .store
            .list_versions(record_type, extractor_class)?
            .into_iter()
            .map(|v| resolve_stage(v, &pointer))
            .collect();
        versions.sort_by(|a, b| {
            a.deployed_at
                .cmp(&b.deployed_at)
                .then_with(|| a.id.version.cmp(&b.id.version))
        });
        Ok(versions)
    }

    /// Stores the outcome of a review run and moves a `Deployed` version to `UnderReview`.
    /// Versions that are or have been production keep the metrics they were promoted with.
    pub fn record_review(
        &self,
        id: &ExtractorVersionId,
        metrics: QualityMetrics,
        comparison: Option<ComparisonReport>,
    ) -> Result<ExtractorVersion, RegistryError> {
        let (stored, current) = self.read_for_update(id)?;
        if matches!(current.stage, VersionStage::Production | VersionStage::Retired) {
            tracing::warn!(
                "Not updating review of {}: version is {:?}",
                id,
                current.stage
            );
            return Ok(current);
        }

        let mut next = stored;
        next.stage = VersionStage::UnderReview;
        next.quality_metrics = Some(metrics);
        next.comparison = comparison;
        next.reviewed_at = Some(Utc::now());
        self.commit(next)?;
        tracing::info!("{} is under review", id);
        self.get(id)
    }

    /// Makes an `UnderReview` version production. The previous production version is
    /// retired by the same pointer write.
    pub fn promote(&self, id: &ExtractorVersionId) -> Result<ExtractorVersion, RegistryError> {
        let revision = self.store.read_pointer(id.record_type, &id.extractor_class)?.revision;
        self.promote_expecting(id, revision)
    }

    /// `promote`, failing with a conflict unless the pointer is still at `expected_revision`.
    pub fn promote_expecting(
        &self,
        id: &ExtractorVersionId,
        expected_revision: u64,
    ) -> Result<ExtractorVersion, RegistryError> {
        let candidate = self.get(id)?;
        if candidate.stage != VersionStage::UnderReview {
            return Err(RegistryError::InvalidTransition {
                version: id.to_string(),
                reason: format!("promotion requires under_review, version is {:?}", candidate.stage),
            });
        }
        let pointer = self.store.read_pointer(id.record_type, &id.extractor_class)?;
        let next = pointer.moved_to(id.version, PointerAction::Promote);
        self.store.write_pointer(&next, expected_revision)?;

        match pointer.production {
            Some(previous) => tracing::info!(
                "Promoted {} to production, retiring {}@{}",
                id,
                id.extractor_class,
                previous
            ),
            None => tracing::info!("Promoted {} to production", id),
        }
        self.get(id)
    }

    /// Points production back at a version that has been production before.
    pub fn rollback(
        &self,
        record_type: RecordType,
        extractor_class: &str,
        target: SemVer,
    ) -> Result<ExtractorVersion, RegistryError> {
        let id = ExtractorVersionId::new(record_type, extractor_class, target);
        if self.store.get_version(&id)?.is_none() {
            return Err(RegistryError::UnknownVersion(id.to_string()));
        }
        let pointer = self.store.read_pointer(record_type, extractor_class)?;
        if pointer.production == Some(target) {
            return Err(RegistryError::InvalidTransition {
                version: id.to_string(),
                reason: "already the production version".to_string(),
            });
        }
        if !pointer.was_production(target) {
            return Err(RegistryError::InvalidTransition {
                version: id.to_string(),
                reason: "rollback target was never production".to_string(),
            });
        }
        let next = pointer.moved_to(target, PointerAction::Rollback);
        self.store.write_pointer(&next, pointer.revision)?;
        tracing::warn!(
            "Rolled back {}/{} to {}",
            record_type,
            extractor_class,
            target
        );
        self.get(&id)
    }

    /// Rejects a candidate that never reached production.
    pub fn retire(&self, id: &ExtractorVersionId) -> Result<ExtractorVersion, RegistryError> {
        let (stored, current) = self.read_for_update(id)?;
        if matches!(current.stage, VersionStage::Production | VersionStage::Retired) {
            return Err(RegistryError::InvalidTransition {
                version: id.to_string(),
                reason: format!("cannot retire a version that is {:?}", current.stage),
            });
        }
        let mut next = stored;
        next.stage = VersionStage::Retired;
        self.commit(next)?;
        tracing::info!("Retired {}", id);
        self.get(id)
    }
}

impl VersionRegistry {
    /// The stored record, and the same record with its stage resolved.
    fn read_for_update(&self, id: &ExtractorVersionId) -> Result<(ExtractorVersion, ExtractorVersion), RegistryError> {
        let stored = self
            .store
            .get_version(id)?
            .ok_or_else(|| RegistryError::UnknownVersion(id.to_string()))?;
        let pointer = self.store.read_pointer(id.record_type, &id.extractor_class)?;
        let resolved = resolve_stage(stored.clone(), &pointer);
        Ok((stored, resolved))
    }

    /// Writes `next` over the revision it was read at.
    fn commit(&self, mut next: ExtractorVersion) -> Result<(), RegistryError> {
        let read_at = next.revision;
        next.revision = read_at + 1;
        self.store.update_version(&next, read_at)
    }
}

fn resolve_stage(mut version: ExtractorVersion, pointer: &ProductionPointer) -> ExtractorVersion {
    let is_production = pointer.production == Some(version.id.version);
    version.is_production = is_production;
    if is_production {
        version.stage = VersionStage::Production;
    } else if pointer.was_production(version.id.version) {
        version.stage = VersionStage::Retired;
    }
    version
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::quality::FieldMetric;

    fn id(version: &str) -> ExtractorVersionId {
        ExtractorVersionId::parse(RecordType::PeriodicTransactionReport, &format!("house_ptr@{}", version)).unwrap()
    }

    fn metrics(aggregate: f64) -> QualityMetrics {
        let mut per_field = BTreeMap::new();
        per_field.insert(
            "filer_name".to_string(),
            FieldMetric {
                expected: 7,
                extraction_rate: 6.0 / 7.0,
                mean_confidence: aggregate / 3.0,
            },
        );
        QualityMetrics {
            sample_size: 7,
            failed_documents: 1,
            aggregate_confidence: aggregate,
            mean_completeness: 0.1 + 0.2,
            per_field,
        }
    }

    fn reviewed(registry: &VersionRegistry, version: &str, aggregate: f64) -> ExtractorVersionId {
        let id = id(version);
        registry.deploy(id.clone(), "test").unwrap();
        registry.record_review(&id, metrics(aggregate), None).unwrap();
        id
    }

    fn production_count(registry: &VersionRegistry) -> usize {
        registry
            .list_versions(RecordType::PeriodicTransactionReport, "house_ptr")
            .unwrap()
            .iter()
            .filter(|v| v.is_production)
            .count()
    }

    #[test]
    fn deploy_starts_outside_production_and_rejects_duplicates() {
        let registry = VersionRegistry::in_memory();
        let version = registry.deploy(id("1.0.0"), "initial").unwrap();
        assert_eq!(version.stage, VersionStage::Deployed);
        assert!(!version.is_production);
        assert!(matches!(
            registry.deploy(id("1.0.0"), "again"),
            Err(RegistryError::AlreadyDeployed(_))
        ));
    }

    #[test]
    fn promotion_requires_review_and_retires_previous_production() {
        let registry = VersionRegistry::in_memory();
        registry.deploy(id("1.0.0"), "initial").unwrap();
        assert!(matches!(
            registry.promote(&id("1.0.0")),
            Err(RegistryError::InvalidTransition { .. })
        ));

        registry.record_review(&id("1.0.0"), metrics(0.87), None).unwrap();
        let a = registry.promote(&id("1.0.0")).unwrap();
        assert_eq!(a.stage, VersionStage::Production);
        assert_eq!(production_count(&registry), 1);

        reviewed(&registry, "1.1.0", 0.94);
        registry.promote(&id("1.1.0")).unwrap();
        assert_eq!(production_count(&registry), 1);
        assert_eq!(registry.get(&id("1.0.0")).unwrap().stage, VersionStage::Retired);
        assert_eq!(
            registry
                .production_id(RecordType::PeriodicTransactionReport, "house_ptr")
                .unwrap(),
            Some(id("1.1.0"))
        );
    }

    #[test]
    fn rollback_restores_previous_metrics_exactly() {
        let registry = VersionRegistry::in_memory();
        reviewed(&registry, "1.0.0", 0.87);
        registry.promote(&id("1.0.0")).unwrap();
        let before = registry.get(&id("1.0.0")).unwrap().quality_metrics;

        reviewed(&registry, "1.1.0", 0.94);
        registry.promote(&id("1.1.0")).unwrap();
        // A later review run against the retired version must not touch its metrics.
        registry.record_review(&id("1.0.0"), metrics(0.01), None).unwrap();

        let restored = registry
            .rollback(RecordType::PeriodicTransactionReport, "house_ptr", SemVer::new(1, 0, 0))
            .unwrap();
        assert!(restored.is_production);
        assert_eq!(restored.quality_metrics, before);
        assert_eq!(production_count(&registry), 1);

        let pointer = registry
            .pointer(RecordType::PeriodicTransactionReport, "house_ptr")
            .unwrap();
        assert_eq!(pointer.revision, 3);
        assert_eq!(pointer.history.last().unwrap().action, PointerAction::Rollback);
    }

    #[test]
    fn rollback_targets_must_have_been_production() {
        let registry = VersionRegistry::in_memory();
        reviewed(&registry, "1.0.0", 0.87);
        registry.promote(&id("1.0.0")).unwrap();
        reviewed(&registry, "1.1.0", 0.94);

        let rollback = |v: SemVer| registry.rollback(RecordType::PeriodicTransactionReport, "house_ptr", v);
        assert!(matches!(rollback(SemVer::new(1, 1, 0)), Err(RegistryError::InvalidTransition { .. })));
        assert!(matches!(rollback(SemVer::new(1, 0, 0)), Err(RegistryError::InvalidTransition { .. })));
        assert!(matches!(rollback(SemVer::new(9, 0, 0)), Err(RegistryError::UnknownVersion(_))));
    }

    #[test]
    fn stale_revision_is_a_conflict_and_nothing_changes() {
        let registry = VersionRegistry::in_memory();
        reviewed(&registry, "1.0.0", 0.87);
        reviewed(&registry, "1.1.0", 0.94);
        let seen = registry
            .pointer(RecordType::PeriodicTransactionReport, "house_ptr")
            .unwrap()
            .revision;

        registry.promote_expecting(&id("1.0.0"), seen).unwrap();
        let err = registry.promote_expecting(&id("1.1.0"), seen).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            registry
                .production_id(RecordType::PeriodicTransactionReport, "house_ptr")
                .unwrap(),
            Some(id("1.0.0"))
        );
    }

    #[test]
    fn retire_rejects_candidates_only() {
        let registry = VersionRegistry::in_memory();
        reviewed(&registry, "1.0.0", 0.87);
        registry.promote(&id("1.0.0")).unwrap();
        registry.deploy(id("1.1.0"), "candidate").unwrap();

        assert!(registry.retire(&id("1.0.0")).is_err());
        let retired = registry.retire(&id("1.1.0")).unwrap();
        assert_eq!(retired.stage, VersionStage::Retired);
        assert!(registry.retire(&id("1.1.0")).is_err());
        assert!(registry.promote(&id("1.1.0")).is_err());
    }

    #[test]
    fn version_updates_fail_over_a_newer_revision() {
        let dir = tempfile::tempdir().unwrap();
        let stores: Vec<Arc<dyn RegistryStore>> = vec![
            Arc::new(MemoryRegistryStore::new()),
            Arc::new(FsRegistryStore::new(dir.path())),
        ];
        for store in stores {
            let registry = VersionRegistry::new(Arc::clone(&store));
            registry.deploy(id("1.1.0"), "candidate").unwrap();
            // A reviewer reads the record, then a retirement lands first.
            let mut review = store.get_version(&id("1.1.0")).unwrap().unwrap();
            registry.retire(&id("1.1.0")).unwrap();

            review.stage = VersionStage::UnderReview;
            review.quality_metrics = Some(metrics(0.94));
            let err = store.update_version(&review, review.revision).unwrap_err();
            assert!(matches!(err, RegistryError::ConcurrentUpdateConflict { expected: 0, found: 1, .. }));
            assert!(err.is_conflict());

            let kept = registry.get(&id("1.1.0")).unwrap();
            assert_eq!(kept.stage, VersionStage::Retired);
            assert_eq!(kept.quality_metrics, None);
        }
    }

    #[test]
    fn old_lock_files_are_reported_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VersionRegistry::new(Arc::new(FsRegistryStore::new(dir.path())));
        reviewed(&registry, "1.0.0", 0.87);
        let lock = dir.path().join("ptr").join("house_ptr").join("pointer.lock");

        let holder = serde_json::json!({
            "pid": 4242,
            "acquired_at": (Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
        });
        std::fs::write(&lock, holder.to_string()).unwrap();
        let err = registry.promote(&id("1.0.0")).unwrap_err();
        match &err {
            RegistryError::StaleLock { holder, .. } => assert!(holder.contains("pid 4242")),
            other => panic!("expected a stale lock, got {:?}", other),
        }
        assert!(!err.is_conflict());
        assert!(lock.exists());

        let fresh = serde_json::json!({ "pid": 4242, "acquired_at": Utc::now().to_rfc3339() });
        std::fs::write(&lock, fresh.to_string()).unwrap();
        assert!(matches!(
            registry.promote(&id("1.0.0")),
            Err(RegistryError::PointerLocked { .. })
        ));

        std::fs::remove_file(&lock).unwrap();
        registry.promote(&id("1.0.0")).unwrap();
        assert!(!lock.exists());
    }

    #[test]
    fn filesystem_store_persists_and_honours_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VersionRegistry::new(Arc::new(FsRegistryStore::new(dir.path())));
        reviewed(&registry, "1.0.0", 0.87);
        registry.promote(&id("1.0.0")).unwrap();

        let reopened = VersionRegistry::new(Arc::new(FsRegistryStore::new(dir.path())));
        let production = reopened
            .production(RecordType::PeriodicTransactionReport, "house_ptr")
            .unwrap()
            .unwrap();
        assert_eq!(production.id, id("1.0.0"));
        assert_eq!(production.changelog, "test");

        reviewed(&reopened, "1.1.0", 0.94);
        let lock = dir.path().join("ptr").join("house_ptr").join("pointer.lock");
        std::fs::write(&lock, b"").unwrap();
        let err = reopened.promote(&id("1.1.0")).unwrap_err();
        assert!(matches!(err, RegistryError::PointerLocked { .. }));

        std::fs::remove_file(&lock).unwrap();
        reopened.promote(&id("1.1.0")).unwrap();
        assert!(!lock.exists());
        let listed = reopened
            .list_versions(RecordType::PeriodicTransactionReport, "house_ptr")
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].stage, VersionStage::Retired);
        assert_eq!(listed[1].stage, VersionStage::Production);
    }
}
