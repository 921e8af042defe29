// src/orchestrator/mod.rs
//! Reprocessing: drives a document population through the pipeline under one
//! extractor version, stores the results beside every other version's, and
//! compares the candidate against the production baseline.

pub mod comparison;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::detector::TemplateDetector;
use crate::documents::{DocumentEnvelope, DocumentSource, RecordType};
use crate::extractors::{Extractor, ExtractorCatalog, ExtractorVersionId};
use crate::ocr::OcrEngine;
use crate::pipeline::{ExtractionResult, Pipeline};
use crate::quality::{QualityMetrics, ResultSummary};
use crate::registry::{ExtractorVersion, VersionRegistry};
use crate::storage::{ClassificationQueue, QueueEntry, ResultStore};
use crate::utils::error::{PipelineError, RegistryError, ReprocessError};

pub use comparison::{compare, ComparisonReport, FieldDelta, Recommendation};

/// A reprocessing run over `record_type` documents filed in `year_range` (inclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessRequest {
    pub record_type: RecordType,
    pub year_range: (i32, i32),
    /// `class@major.minor.patch`
    pub extractor_version: String,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentErrorKind {
    UnrecognizedTemplate,
    RecordTypeMismatch,
    AllAttemptsExhausted,
    LoadFailed,
    StorageFailed,
    TaskFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentError {
    pub doc_id: String,
    pub kind: DocumentErrorKind,
    pub message: String,
}

impl DocumentError {
    fn new(doc_id: &str, kind: DocumentErrorKind, message: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessReport {
    pub status: RunStatus,
    pub record_type: RecordType,
    pub extractor_version: String,
    pub dry_run: bool,
    pub documents_matched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Documents that already had a result under this version and were left alone.
    pub skipped_existing: usize,
    /// Untyped documents the detector placed in another record type; counted in
    /// `documents_matched` but neither processed nor failed.
    #[serde(default)]
    pub other_record_type: Vec<String>,
    pub per_document_errors: Vec<DocumentError>,
    pub quality_metrics: Option<QualityMetrics>,
    pub comparison: Option<ComparisonReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReprocessReport {
    /// Documents this run attempted, whether they succeeded or not.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Shared flag checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one document in a run.
enum DocumentRun {
    Processed {
        summary: ResultSummary,
        error: Option<DocumentError>,
    },
    Skipped(ResultSummary),
    OtherType { doc_id: String, found: RecordType },
    Failed(DocumentError),
}

/// Everything a blocking worker needs for one run.
struct RunContext {
    pipeline: Arc<Pipeline>,
    source: Arc<dyn DocumentSource>,
    store: Arc<ResultStore>,
    queue: Arc<ClassificationQueue>,
    extractor: Arc<dyn Extractor>,
    overwrite: bool,
}

impl RunContext {
    fn process(&self, envelope: &DocumentEnvelope) -> DocumentRun {
        let doc_id = envelope.doc_id.as_str();
        let version = self.extractor.id();

        if !self.overwrite {
            match self.store.load(version, envelope.year, doc_id) {
                Ok(Some(existing)) => {
                    tracing::debug!("Keeping existing {} result for {}", version, doc_id);
                    return DocumentRun::Skipped(ResultSummary::from(&existing));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Existing result for {} is unreadable, re-extracting: {}", doc_id, e),
            }
        }

        let bytes = match self.source.load(doc_id) {
            Ok(bytes) => bytes,
            Err(e) => return DocumentRun::Failed(DocumentError::new(doc_id, DocumentErrorKind::LoadFailed, e.to_string())),
        };

        let result = match self.pipeline.run(envelope, &bytes, self.extractor.as_ref()) {
            Ok(result) => result,
            Err(PipelineError::RecordTypeMismatch { found, .. }) if envelope.record_type.is_none() => {
                return DocumentRun::OtherType {
                    doc_id: doc_id.to_string(),
                    found,
                };
            }
            Err(e) => return DocumentRun::Failed(self.pipeline_failure(envelope, e)),
        };

        if let Err(e) = self.store.write(&result, self.overwrite) {
            tracing::error!("Failed to store result for {}: {}", doc_id, e);
            return DocumentRun::Failed(DocumentError::new(doc_id, DocumentErrorKind::StorageFailed, e.to_string()));
        }

        let error = result.exhausted().then(|| {
            let err = PipelineError::AllAttemptsExhausted {
                doc_id: doc_id.to_string(),
                attempts: result.audit.attempts.len(),
            };
            DocumentError::new(doc_id, DocumentErrorKind::AllAttemptsExhausted, err.to_string())
        });
        DocumentRun::Processed {
            summary: ResultSummary::from(&result),
            error,
        }
    }

    fn pipeline_failure(&self, envelope: &DocumentEnvelope, err: PipelineError) -> DocumentError {
        let doc_id = envelope.doc_id.as_str();
        match err {
            PipelineError::Detect(detect) => {
                queue_for_classification(&self.queue, envelope, detect.to_string());
                DocumentError::new(doc_id, DocumentErrorKind::UnrecognizedTemplate, detect.to_string())
            }
            e @ PipelineError::RecordTypeMismatch { .. } => {
                DocumentError::new(doc_id, DocumentErrorKind::RecordTypeMismatch, e.to_string())
            }
            e @ PipelineError::AllAttemptsExhausted { .. } => {
                DocumentError::new(doc_id, DocumentErrorKind::AllAttemptsExhausted, e.to_string())
            }
        }
    }
}

fn queue_for_classification(queue: &ClassificationQueue, envelope: &DocumentEnvelope, reason: String) {
    let entry = QueueEntry {
        doc_id: envelope.doc_id.clone(),
        year: envelope.year,
        record_type_hint: envelope.record_type,
        reason,
        queued_at: Utc::now(),
    };
    if let Err(e) = queue.enqueue(&entry) {
        tracing::error!("Failed to queue {} for classification: {}", envelope.doc_id, e);
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    catalog: Arc<ExtractorCatalog>,
    registry: Arc<VersionRegistry>,
    source: Arc<dyn DocumentSource>,
    store: Arc<ResultStore>,
    queue: Arc<ClassificationQueue>,
    pipeline: Arc<Pipeline>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<ExtractorCatalog>,
        registry: Arc<VersionRegistry>,
        source: Arc<dyn DocumentSource>,
        store: Arc<ResultStore>,
        queue: Arc<ClassificationQueue>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        let detector = TemplateDetector::new(config.detector.min_match_score);
        let pipeline = Arc::new(Pipeline::new(detector, ocr, config.min_text_chars));
        Self {
            config,
            catalog,
            registry,
            source,
            store,
            queue,
            pipeline,
        }
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn catalog(&self) -> &ExtractorCatalog {
        &self.catalog
    }

    /// Registers a version shipped in the catalog with the registry.
    pub fn deploy(
        &self,
        record_type: RecordType,
        version_ref: &str,
        changelog: &str,
    ) -> Result<ExtractorVersion, ReprocessError> {
        let id = ExtractorVersionId::parse(record_type, version_ref).map_err(ReprocessError::InvalidRequest)?;
        if self.catalog.get(&id).is_none() {
            return Err(ReprocessError::UnknownExtractorVersion(id.to_string()));
        }
        Ok(self.registry.deploy(id, changelog)?)
    }

    /// The extractor to use for an ad-hoc extraction: the requested version, else
    /// production, else the newest version in the catalog.
    pub fn resolve_extractor(
        &self,
        record_type: RecordType,
        version_ref: Option<&str>,
    ) -> Result<Arc<dyn Extractor>, ReprocessError> {
        if let Some(version_ref) = version_ref {
            let id = ExtractorVersionId::parse(record_type, version_ref).map_err(ReprocessError::InvalidRequest)?;
            return self
                .catalog
                .get(&id)
                .ok_or_else(|| ReprocessError::UnknownExtractorVersion(id.to_string()));
        }
        let latest = self
            .catalog
            .latest(record_type)
            .ok_or_else(|| ReprocessError::UnknownExtractorVersion(format!("{}/*", record_type)))?;
        match self.registry.production_id(record_type, &latest.id().extractor_class)? {
            Some(production) => Ok(self.catalog.get(&production).unwrap_or(latest)),
            None => Ok(latest),
        }
    }

    /// Runs one document outside of a reprocessing run. Unrecognized documents are
    /// queued for manual classification.
    pub fn extract_document(
        &self,
        envelope: &DocumentEnvelope,
        bytes: &[u8],
        version_ref: Option<&str>,
    ) -> Result<ExtractionResult, ReprocessError> {
        let record_type = match envelope.record_type {
            Some(record_type) => record_type,
            None => match self.pipeline.detect(envelope, bytes) {
                Ok(detection) => detection.record_type,
                Err(e) => return Err(self.queue_unrecognized(envelope, e)),
            },
        };
        let extractor = self.resolve_extractor(record_type, version_ref)?;
        self.pipeline
            .run(envelope, bytes, extractor.as_ref())
            .map_err(|e| self.queue_unrecognized(envelope, e))
    }

    fn queue_unrecognized(&self, envelope: &DocumentEnvelope, err: PipelineError) -> ReprocessError {
        if let PipelineError::Detect(detect) = &err {
            queue_for_classification(&self.queue, envelope, detect.to_string());
        }
        ReprocessError::Pipeline(err)
    }

    /// Reprocesses the selected population under one extractor version.
    ///
    /// Per-document failures are reported, never raised. A completed, non-dry run
    /// stores the version's quality metrics and its comparison against production.
    pub async fn reprocess(
        &self,
        request: &ReprocessRequest,
        cancel: &CancellationFlag,
    ) -> Result<ReprocessReport, ReprocessError> {
        let started_at = Utc::now();
        let (start, end) = request.year_range;
        if start > end {
            return Err(ReprocessError::InvalidYearRange { start, end });
        }
        let batch_size = request.batch_size.unwrap_or(self.config.default_batch_size);
        if batch_size == 0 {
            return Err(ReprocessError::InvalidRequest("batch_size must be greater than 0".into()));
        }
        let id = ExtractorVersionId::parse(request.record_type, &request.extractor_version)
            .map_err(ReprocessError::InvalidRequest)?;
        let extractor = self
            .catalog
            .get(&id)
            .ok_or_else(|| ReprocessError::UnknownExtractorVersion(id.to_string()))?;
        let version = match self.registry.get(&id) {
            Ok(version) => version,
            Err(RegistryError::UnknownVersion(_)) => {
                return Err(ReprocessError::UnknownExtractorVersion(format!("{} (not deployed)", id)))
            }
            Err(e) => return Err(e.into()),
        };

        let population = self.source.select(request.record_type, start..=end)?;
        tracing::info!(
            "Reprocessing {} {} documents from {}-{} with {} ({:?}){}",
            population.len(),
            request.record_type,
            start,
            end,
            id,
            version.stage,
            if request.dry_run { " [dry run]" } else { "" }
        );

        let mut report = ReprocessReport {
            status: RunStatus::Completed,
            record_type: request.record_type,
            extractor_version: id.version_ref(),
            dry_run: request.dry_run,
            documents_matched: population.len(),
            succeeded: 0,
            failed: 0,
            skipped_existing: 0,
            other_record_type: Vec::new(),
            per_document_errors: Vec::new(),
            quality_metrics: None,
            comparison: None,
            started_at,
            finished_at: started_at,
        };
        if request.dry_run {
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let ctx = Arc::new(RunContext {
            pipeline: Arc::clone(&self.pipeline),
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            extractor,
            overwrite: request.overwrite,
        });
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let batches = population.len().div_ceil(batch_size);
        let mut summaries: Vec<ResultSummary> = Vec::with_capacity(population.len());

        for (n, batch) in population.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("Run cancelled after {} of {} batches", n, batches);
                report.status = RunStatus::Cancelled;
                break;
            }
            run_batch(&ctx, &semaphore, batch, &mut report, &mut summaries).await;
            tracing::info!(
                "Batch {}/{} done: {} succeeded, {} failed, {} kept",
                n + 1,
                batches,
                report.succeeded,
                report.failed,
                report.skipped_existing
            );
        }
        report
            .per_document_errors
            .sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        report.other_record_type.sort();

        let metrics = QualityMetrics::from_summaries(&summaries);
        if report.status == RunStatus::Completed {
            let in_run: Vec<DocumentEnvelope> = population
                .iter()
                .filter(|e| report.other_record_type.binary_search(&e.doc_id).is_err())
                .cloned()
                .collect();
            let comparison = self.compare_with_production(&id, &in_run, &metrics);
            if let Some(comparison) = &comparison {
                tracing::info!(
                    "{} vs {}: aggregate {:+.3}, recommendation {:?}",
                    comparison.candidate_version,
                    comparison.baseline_version,
                    comparison.aggregate_delta,
                    comparison.recommendation
                );
            }
            self.registry.record_review(&id, metrics.clone(), comparison.clone())?;
            report.comparison = comparison;
        }
        report.quality_metrics = Some(metrics);
        report.finished_at = Utc::now();
        tracing::info!(
            "Run finished ({:?}): {} matched, {} succeeded, {} failed, {} kept",
            report.status,
            report.documents_matched,
            report.succeeded,
            report.failed,
            report.skipped_existing
        );
        Ok(report)
    }

    /// Production's stored results for the same population, compared against the candidate.
    /// `None` without a production version or when the candidate is production.
    fn compare_with_production(
        &self,
        candidate: &ExtractorVersionId,
        population: &[DocumentEnvelope],
        candidate_metrics: &QualityMetrics,
    ) -> Option<ComparisonReport> {
        let production = match self
            .registry
            .production_id(candidate.record_type, &candidate.extractor_class)
        {
            Ok(Some(production)) if production != *candidate => production,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!("Cannot read production pointer for {}: {}", candidate, e);
                return None;
            }
        };

        let baseline: Vec<ResultSummary> = population
            .iter()
            .filter_map(|envelope| match self.store.load(&production, envelope.year, &envelope.doc_id) {
                Ok(result) => result.map(|r| ResultSummary::from(&r)),
                Err(e) => {
                    tracing::warn!("Skipping baseline result for {}: {}", envelope.doc_id, e);
                    None
                }
            })
            .collect();
        if baseline.len() < population.len() {
            tracing::warn!(
                "Baseline {} has results for {} of {} documents",
                production,
                baseline.len(),
                population.len()
            );
        }

        Some(compare(
            &production.version_ref(),
            &QualityMetrics::from_summaries(&baseline),
            &candidate.version_ref(),
            candidate_metrics,
            &self.config.promotion,
        ))
    }
}

/// Runs one batch with at most `semaphore`'s permits in flight and folds the outcomes into `report`.
async fn run_batch(
    ctx: &Arc<RunContext>,
    semaphore: &Arc<Semaphore>,
    batch: &[DocumentEnvelope],
    report: &mut ReprocessReport,
    summaries: &mut Vec<ResultSummary>,
) {
    let mut tasks = JoinSet::new();
    for envelope in batch {
        let permit = match Arc::clone(semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                report.failed += 1;
                report.per_document_errors.push(DocumentError::new(
                    &envelope.doc_id,
                    DocumentErrorKind::TaskFailed,
                    e.to_string(),
                ));
                continue;
            }
        };
        let ctx = Arc::clone(ctx);
        let envelope = envelope.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            ctx.process(&envelope)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(DocumentRun::Processed { summary, error }) => {
                match error {
                    Some(error) => {
                        report.failed += 1;
                        report.per_document_errors.push(error);
                    }
                    None => report.succeeded += 1,
                }
                summaries.push(summary);
            }
            Ok(DocumentRun::Skipped(summary)) => {
                report.skipped_existing += 1;
                summaries.push(summary);
            }
            Ok(DocumentRun::OtherType { doc_id, found }) => {
                tracing::info!("Leaving {} out of the run: detected as {}", doc_id, found);
                report.other_record_type.push(doc_id);
            }
            Ok(DocumentRun::Failed(error)) => {
                tracing::warn!("Document {} failed: {}", error.doc_id, error.message);
                report.failed += 1;
                report.per_document_errors.push(error);
            }
            Err(e) => {
                tracing::error!("Extraction task failed: {}", e);
                report.failed += 1;
                report.per_document_errors.push(DocumentError::new(
                    "unknown",
                    DocumentErrorKind::TaskFailed,
                    e.to_string(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{HOUSE_ANNUAL, HOUSE_PTR, PNG_BYTES};
    use crate::documents::MemoryDocumentSource;
    use crate::ocr::DisabledOcr;
    use crate::registry::VersionStage;

    struct Harness {
        _dir: tempfile::TempDir,
        orchestrator: Orchestrator,
    }

    fn envelope(doc_id: &str, year: i32, record_type: RecordType) -> DocumentEnvelope {
        DocumentEnvelope {
            doc_id: doc_id.to_string(),
            year,
            record_type: Some(record_type),
        }
    }

    fn harness(source: MemoryDocumentSource) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            default_batch_size: 3,
            max_concurrency: 2,
            ..EngineConfig::default()
        };
        let store = Arc::new(ResultStore::new(config.results_dir()).unwrap());
        let queue = Arc::new(ClassificationQueue::new(config.queue_dir()));
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(ExtractorCatalog::builtin()),
            Arc::new(VersionRegistry::in_memory()),
            Arc::new(source),
            store,
            queue,
            Arc::new(DisabledOcr),
        );
        Harness { _dir: dir, orchestrator }
    }

    /// `good` readable PTRs plus `scans` image-only ones, all filed in 2023.
    fn ptr_population(good: usize, scans: usize) -> MemoryDocumentSource {
        let mut source = MemoryDocumentSource::new();
        for n in 0..good {
            source.insert(
                envelope(&format!("ptr-{:03}", n), 2023, RecordType::PeriodicTransactionReport),
                HOUSE_PTR,
            );
        }
        for n in 0..scans {
            source.insert(
                envelope(&format!("scan-{:03}", n), 2023, RecordType::PeriodicTransactionReport),
                PNG_BYTES,
            );
        }
        source.insert(envelope("annual-1", 2023, RecordType::AnnualReport), HOUSE_ANNUAL);
        source
    }

    fn request(version: &str) -> ReprocessRequest {
        ReprocessRequest {
            record_type: RecordType::PeriodicTransactionReport,
            year_range: (2022, 2023),
            extractor_version: version.to_string(),
            batch_size: None,
            dry_run: false,
            overwrite: false,
        }
    }

    fn files_under(path: &std::path::Path) -> usize {
        if !path.exists() {
            return 0;
        }
        std::fs::read_dir(path)
            .unwrap()
            .map(|entry| {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    files_under(&path)
                } else {
                    1
                }
            })
            .sum()
    }

    fn ptr_id(version: &str) -> ExtractorVersionId {
        ExtractorVersionId::parse(RecordType::PeriodicTransactionReport, version).unwrap()
    }

    #[tokio::test]
    async fn failing_documents_do_not_fail_the_run() {
        let h = harness(ptr_population(5, 2));
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();

        let report = h
            .orchestrator
            .reprocess(&request("house_ptr@1.1.0"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.documents_matched, 7);
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.failed, 2);
        assert_eq!(report.processed(), 7);
        assert_eq!(report.per_document_errors.len(), 2);
        assert_eq!(report.per_document_errors[0].doc_id, "scan-000");
        assert!(report
            .per_document_errors
            .iter()
            .all(|e| e.kind == DocumentErrorKind::AllAttemptsExhausted));

        // Exhausted documents still get a result, with zero scores.
        let id = ptr_id("house_ptr@1.1.0");
        let scan = h.orchestrator.store().load(&id, 2023, "scan-001").unwrap().unwrap();
        assert!(scan.exhausted());
        assert_eq!(scan.completeness_ratio, 0.0);

        let metrics = report.quality_metrics.unwrap();
        assert_eq!(metrics.sample_size, 7);
        assert_eq!(metrics.failed_documents, 2);
        assert!(report.comparison.is_none());
        let version = h.orchestrator.registry().get(&id).unwrap();
        assert_eq!(version.stage, VersionStage::UnderReview);
        assert_eq!(version.quality_metrics, Some(metrics));
    }

    #[test]
    fn dry_run_only_counts() {
        let mut source = MemoryDocumentSource::new();
        for n in 0..1245 {
            source.insert(
                envelope(&format!("{:05}", n), 2020 + (n % 4) as i32, RecordType::PeriodicTransactionReport),
                HOUSE_PTR,
            );
        }
        let h = harness(source);
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.0.0", "baseline")
            .unwrap();

        let mut dry = request("house_ptr@1.0.0");
        dry.year_range = (2020, 2023);
        dry.dry_run = true;
        let report = tokio_test::block_on(h.orchestrator.reprocess(&dry, &CancellationFlag::new())).unwrap();
        assert_eq!(report.documents_matched, 1245);
        assert_eq!(report.succeeded, 0);
        assert!(report.quality_metrics.is_none());
        assert_eq!(files_under(h.orchestrator.store().root()), 0);
        let version = h.orchestrator.registry().get(&ptr_id("house_ptr@1.0.0")).unwrap();
        assert_eq!(version.stage, VersionStage::Deployed);
    }

    #[tokio::test]
    async fn rerun_keeps_existing_results_unless_overwriting() {
        let h = harness(ptr_population(4, 0));
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();
        let first = h
            .orchestrator
            .reprocess(&request("house_ptr@1.1.0"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(first.succeeded, 4);

        let second = h
            .orchestrator
            .reprocess(&request("house_ptr@1.1.0"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(second.skipped_existing, 4);
        assert_eq!(second.succeeded, 0);
        let (a, b) = (first.quality_metrics.unwrap(), second.quality_metrics.unwrap());
        assert_eq!(a.sample_size, b.sample_size);
        assert!((a.aggregate_confidence - b.aggregate_confidence).abs() < 1e-9);

        let mut overwrite = request("house_ptr@1.1.0");
        overwrite.overwrite = true;
        let third = h.orchestrator.reprocess(&overwrite, &CancellationFlag::new()).await.unwrap();
        assert_eq!(third.succeeded, 4);
        assert_eq!(third.skipped_existing, 0);
        assert_eq!(files_under(h.orchestrator.store().root()), 4);
    }

    #[tokio::test]
    async fn cancelled_run_reports_and_skips_review() {
        let h = harness(ptr_population(4, 0));
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report = h.orchestrator.reprocess(&request("house_ptr@1.1.0"), &cancel).await.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.documents_matched, 4);
        assert_eq!(report.processed(), 0);
        let version = h.orchestrator.registry().get(&ptr_id("house_ptr@1.1.0")).unwrap();
        assert_eq!(version.stage, VersionStage::Deployed);
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let h = harness(ptr_population(1, 0));
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();
        let cancel = CancellationFlag::new();

        let mut reversed = request("house_ptr@1.1.0");
        reversed.year_range = (2024, 2020);
        assert!(matches!(
            h.orchestrator.reprocess(&reversed, &cancel).await,
            Err(ReprocessError::InvalidYearRange { .. })
        ));

        let mut zero = request("house_ptr@1.1.0");
        zero.batch_size = Some(0);
        assert!(matches!(
            h.orchestrator.reprocess(&zero, &cancel).await,
            Err(ReprocessError::InvalidRequest(_))
        ));

        for unknown in ["house_ptr@9.9.9", "house_ptr@1.0.0"] {
            assert!(matches!(
                h.orchestrator.reprocess(&request(unknown), &cancel).await,
                Err(ReprocessError::UnknownExtractorVersion(_))
            ));
        }
        assert!(matches!(
            h.orchestrator.reprocess(&request("not a version"), &cancel).await,
            Err(ReprocessError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.orchestrator.deploy(RecordType::PeriodicTransactionReport, "house_ptr@2.0.0", "x"),
            Err(ReprocessError::UnknownExtractorVersion(_))
        ));
    }

    #[tokio::test]
    async fn candidate_is_compared_with_production_over_the_same_documents() {
        let h = harness(ptr_population(3, 1));
        let cancel = CancellationFlag::new();
        let orchestrator = &h.orchestrator;

        orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.0.0", "positional rows")
            .unwrap();
        orchestrator.reprocess(&request("house_ptr@1.0.0"), &cancel).await.unwrap();
        orchestrator.registry().promote(&ptr_id("house_ptr@1.0.0")).unwrap();

        orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();
        let report = orchestrator.reprocess(&request("house_ptr@1.1.0"), &cancel).await.unwrap();
        let comparison = report.comparison.unwrap();
        assert_eq!(comparison.baseline_version, "house_ptr@1.0.0");
        assert_eq!(comparison.candidate_version, "house_ptr@1.1.0");
        assert_eq!(comparison.baseline_sample_size, 4);
        let description = &comparison.deltas_by_field["transaction.description"];
        assert_eq!(description.baseline_extraction_rate, 0.0);
        assert!(description.candidate_extraction_rate > 0.0);

        // Both versions' results sit side by side.
        let store = orchestrator.store();
        assert!(store.load(&ptr_id("house_ptr@1.0.0"), 2023, "ptr-000").unwrap().is_some());
        let current = store
            .load_current(orchestrator.registry(), RecordType::PeriodicTransactionReport, "house_ptr", 2023, "ptr-000")
            .unwrap()
            .unwrap();
        assert_eq!(current.extractor, ptr_id("house_ptr@1.0.0"));

        let stored = orchestrator.registry().get(&ptr_id("house_ptr@1.1.0")).unwrap();
        assert_eq!(stored.comparison, Some(comparison));
    }

    #[tokio::test]
    async fn untyped_documents_are_detected_queued_or_left_out() {
        let untyped = |doc_id: &str| DocumentEnvelope {
            doc_id: doc_id.to_string(),
            year: 2023,
            record_type: None,
        };
        let mut source = MemoryDocumentSource::new();
        source.insert(untyped("untyped-ptr"), HOUSE_PTR);
        source.insert(untyped("untyped-annual"), HOUSE_ANNUAL);
        source.insert(untyped("untyped-minutes"), "Minutes of the garden club meeting, held on Tuesday evening.");
        source.insert(untyped("untyped-scan"), PNG_BYTES);
        let h = harness(source);
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();

        let report = h
            .orchestrator
            .reprocess(&request("house_ptr@1.1.0"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(report.documents_matched, 4);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.other_record_type, vec!["untyped-annual".to_string()]);
        let failed: Vec<&str> = report.per_document_errors.iter().map(|e| e.doc_id.as_str()).collect();
        assert_eq!(failed, vec!["untyped-minutes", "untyped-scan"]);
        assert!(report
            .per_document_errors
            .iter()
            .all(|e| e.kind == DocumentErrorKind::UnrecognizedTemplate));
        assert_eq!(report.quality_metrics.unwrap().sample_size, 1);

        let queued = ClassificationQueue::new(h._dir.path().join("queue")).list().unwrap();
        let queued: Vec<&str> = queued.iter().map(|e| e.doc_id.as_str()).collect();
        assert_eq!(queued, vec!["untyped-minutes", "untyped-scan"]);

        let id = ptr_id("house_ptr@1.1.0");
        let stored = h.orchestrator.store().load(&id, 2023, "untyped-ptr").unwrap().unwrap();
        assert_eq!(stored.record_type, RecordType::PeriodicTransactionReport);
        assert!(h.orchestrator.store().load(&id, 2023, "untyped-annual").unwrap().is_none());
    }

    #[tokio::test]
    async fn look_alike_doc_ids_are_extracted_separately() {
        let mut source = MemoryDocumentSource::new();
        source.insert(envelope("A/1", 2023, RecordType::PeriodicTransactionReport), HOUSE_PTR);
        source.insert(envelope("A_1", 2023, RecordType::PeriodicTransactionReport), PNG_BYTES);
        let h = harness(source);
        h.orchestrator
            .deploy(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0", "labeled rows")
            .unwrap();

        let report = h
            .orchestrator
            .reprocess(&request("house_ptr@1.1.0"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped_existing, 0);

        let id = ptr_id("house_ptr@1.1.0");
        let scan = h.orchestrator.store().load(&id, 2023, "A_1").unwrap().unwrap();
        assert_eq!(scan.doc_id, "A_1");
        assert!(scan.exhausted());
        let filing = h.orchestrator.store().load(&id, 2023, "A/1").unwrap().unwrap();
        assert_eq!(filing.doc_id, "A/1");
        assert!(!filing.exhausted());
    }

    #[test]
    fn extract_document_uses_production_then_catalog() {
        let h = harness(MemoryDocumentSource::new());
        let doc = DocumentEnvelope {
            doc_id: "20022419".to_string(),
            year: 2023,
            record_type: None,
        };
        let result = h
            .orchestrator
            .extract_document(&doc, HOUSE_PTR.as_bytes(), None)
            .unwrap();
        assert_eq!(result.extractor.version_ref(), "house_ptr@1.1.0");

        let pinned = h
            .orchestrator
            .extract_document(&doc, HOUSE_PTR.as_bytes(), Some("house_ptr@1.0.0"))
            .unwrap();
        assert_eq!(pinned.extractor.version_ref(), "house_ptr@1.0.0");
    }

    #[test]
    fn unrecognized_documents_are_queued() {
        let h = harness(MemoryDocumentSource::new());
        let doc = DocumentEnvelope {
            doc_id: "mystery".to_string(),
            year: 2023,
            record_type: None,
        };
        let err = h
            .orchestrator
            .extract_document(&doc, b"Minutes of the garden club meeting, held on Tuesday evening.", None)
            .unwrap_err();
        assert!(matches!(err, ReprocessError::Pipeline(PipelineError::Detect(_))));
        let queue = ClassificationQueue::new(h._dir.path().join("queue"));
        let queued = queue.list().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].doc_id, "mystery");
    }

    #[test]
    fn request_round_trips_through_json() {
        let json = r#"{"record_type":"ptr","year_range":[2020,2023],"extractor_version":"house_ptr@1.1.0"}"#;
        let request: ReprocessRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.year_range, (2020, 2023));
        assert!(!request.dry_run);
        assert_eq!(request.batch_size, None);
    }
}
