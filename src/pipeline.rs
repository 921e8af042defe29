// src/pipeline.rs
//! The per-document pipeline: detect, extract (method by method), score, audit.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AttemptOutcome, AuditTrail, AuditTrailBuilder, Phase};
use crate::detector::{Detection, TemplateDetector};
use crate::documents::{text_layer, AttemptMethod, DocumentEnvelope, RecordType};
use crate::extractors::{BlockError, Extraction, Extractor, ExtractorVersionId, FieldValue, SubRecord};
use crate::ocr::OcrEngine;
use crate::quality::{QualityScorer, ScoredExtraction, SuspiciousFlag};
use crate::utils::error::{ExtractionAttemptFailure, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    /// Completeness reached the record type's floor.
    Succeeded,
    /// Fields were extracted, but completeness stayed below the floor.
    Partial,
    /// Every attempt failed.
    Failed,
}

/// The immutable output of one (document, extractor version) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub doc_id: String,
    pub record_type: RecordType,
    pub year: i32,
    pub extractor: ExtractorVersionId,
    pub outcome: DocumentOutcome,
    /// Method whose extraction was kept.
    pub method: Option<AttemptMethod>,
    pub fields: Vec<FieldValue>,
    pub sub_records: Vec<SubRecord>,
    pub block_errors: Vec<BlockError>,
    pub aggregate_confidence: f64,
    pub completeness_ratio: f64,
    pub suspicious_flags: Vec<SuspiciousFlag>,
    pub audit: AuditTrail,
    pub produced_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    /// True when every attempt method failed.
    pub fn exhausted(&self) -> bool {
        self.outcome == DocumentOutcome::Failed
    }
}

pub struct Pipeline {
    detector: TemplateDetector,
    scorer: QualityScorer,
    ocr: Arc<dyn OcrEngine>,
    min_text_chars: usize,
}

impl Pipeline {
    pub fn new(detector: TemplateDetector, ocr: Arc<dyn OcrEngine>, min_text_chars: usize) -> Self {
        Self {
            detector,
            scorer: QualityScorer::new(),
            ocr,
            min_text_chars,
        }
    }

    /// Detection only: record type and attempt order.
    pub fn detect(&self, envelope: &DocumentEnvelope, bytes: &[u8]) -> Result<Detection, PipelineError> {
        let (physical, text) = text_layer::analyze(bytes, self.min_text_chars);
        Ok(self.detector.detect(envelope, &physical, text.as_deref().ok())?)
    }

    /// Runs one document through detection, every attempt method in order, scoring
    /// and audit. When every attempt fails the result is still produced, with a
    /// failed outcome and zero scores.
    pub fn run(
        &self,
        envelope: &DocumentEnvelope,
        bytes: &[u8],
        extractor: &dyn Extractor,
    ) -> Result<ExtractionResult, PipelineError> {
        let started = Instant::now();
        let detection_start = Instant::now();
        let (physical, text_layer) = text_layer::analyze(bytes, self.min_text_chars);
        let detection = self
            .detector
            .detect(envelope, &physical, text_layer.as_deref().ok())?;

        let expected = extractor.id().record_type;
        if detection.record_type != expected {
            return Err(PipelineError::RecordTypeMismatch {
                doc_id: envelope.doc_id.clone(),
                expected,
                found: detection.record_type,
            });
        }

        let mut audit = AuditTrailBuilder::new(physical.clone()).started_at(started);
        audit.add_phase(Phase::Detection, detection_start.elapsed());
        audit.detection(detection.attempt_order.clone(), detection.template_id.clone());

        let schema = extractor.schema();
        let mut best: Option<(AttemptMethod, ScoredExtraction)> = None;

        for &method in &detection.attempt_order {
            let attempt_started_at = Utc::now();
            let attempt_start = Instant::now();

            let text: Result<String, ExtractionAttemptFailure> = match method {
                AttemptMethod::DirectText => text_layer.clone().map_err(ExtractionAttemptFailure::from),
                AttemptMethod::Ocr => audit.time_phase(Phase::Extraction, || {
                    self.ocr
                        .recognize(bytes)
                        .map(|out| out.text)
                        .map_err(ExtractionAttemptFailure::from)
                }),
            };

            let extraction = text.and_then(|text| {
                let extraction: Extraction = audit.time_phase(Phase::Extraction, || extractor.extract(&text, method));
                if extraction.is_empty() {
                    Err(ExtractionAttemptFailure::NoFieldsMatched)
                } else {
                    Ok(extraction)
                }
            });

            let extraction = match extraction {
                Ok(extraction) => extraction,
                Err(failure) => {
                    tracing::debug!("Attempt {} failed for {}: {}", method, envelope.doc_id, failure);
                    audit.record_attempt(
                        method,
                        attempt_started_at,
                        attempt_start.elapsed(),
                        AttemptOutcome::Failed,
                        Some(failure.to_string()),
                    );
                    continue;
                }
            };

            let scored = audit.time_phase(Phase::Scoring, || {
                self.scorer.score(schema, extraction, physical.page_count)
            });
            let outcome = if scored.completeness_ratio >= schema.completeness_floor {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Partial
            };
            audit.record_attempt(method, attempt_started_at, attempt_start.elapsed(), outcome, None);

            let better = match &best {
                None => true,
                Some((_, current)) => {
                    (scored.completeness_ratio, scored.aggregate_confidence)
                        > (current.completeness_ratio, current.aggregate_confidence)
                }
            };
            if better {
                best = Some((method, scored));
            }
            if outcome == AttemptOutcome::Success {
                break;
            }
        }

        let (method, scored, outcome) = match best {
            Some((method, scored)) => {
                let outcome = if scored.completeness_ratio >= schema.completeness_floor {
                    DocumentOutcome::Succeeded
                } else {
                    DocumentOutcome::Partial
                };
                (Some(method), scored, outcome)
            }
            None => {
                tracing::warn!(
                    "All {} attempts failed for document {}",
                    audit.attempts().len(),
                    envelope.doc_id
                );
                let scored = self.scorer.score(schema, Extraction::default(), physical.page_count);
                (None, scored, DocumentOutcome::Failed)
            }
        };

        let result = ExtractionResult {
            doc_id: envelope.doc_id.clone(),
            record_type: expected,
            year: envelope.year,
            extractor: extractor.id().clone(),
            outcome,
            method,
            fields: scored.fields,
            sub_records: scored.sub_records,
            block_errors: scored.block_errors,
            aggregate_confidence: scored.aggregate_confidence,
            completeness_ratio: scored.completeness_ratio,
            suspicious_flags: scored.suspicious_flags,
            audit: audit.build(),
            produced_at: Utc::now(),
        };
        tracing::debug!(
            "Document {} under {}: {:?}, aggregate {:.3}, completeness {:.3}",
            result.doc_id,
            result.extractor,
            result.outcome,
            result.aggregate_confidence,
            result.completeness_ratio
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentFormat;
    use crate::extractors::{annual, ptr};
    use crate::fixtures::{HOUSE_ANNUAL, HOUSE_PTR, PNG_BYTES};
    use crate::ocr::tests::FixedOcr;
    use crate::ocr::DisabledOcr;

    fn pipeline(ocr: Arc<dyn OcrEngine>) -> Pipeline {
        Pipeline::new(TemplateDetector::new(0.5), ocr, 40)
    }

    fn envelope(doc_id: &str, record_type: Option<RecordType>) -> DocumentEnvelope {
        DocumentEnvelope {
            doc_id: doc_id.to_string(),
            year: 2023,
            record_type,
        }
    }

    #[test]
    fn direct_text_success_stops_the_attempt_chain() {
        let result = pipeline(Arc::new(DisabledOcr))
            .run(&envelope("20022419", None), HOUSE_PTR.as_bytes(), &ptr::house_ptr_v1_1())
            .unwrap();
        assert_eq!(result.outcome, DocumentOutcome::Succeeded);
        assert_eq!(result.method, Some(AttemptMethod::DirectText));
        assert_eq!(result.audit.attempts.len(), 1);
        assert_eq!(result.audit.attempts[0].outcome, AttemptOutcome::Success);
        assert_eq!(result.audit.template_id.as_deref(), Some("house_ptr"));
        assert_eq!(result.sub_records.len(), 3);
        assert_eq!(result.completeness_ratio, 1.0);
    }

    #[test]
    fn image_only_falls_back_through_every_method() {
        let result = pipeline(Arc::new(DisabledOcr))
            .run(
                &envelope("scan", Some(RecordType::PeriodicTransactionReport)),
                PNG_BYTES,
                &ptr::house_ptr_v1_1(),
            )
            .unwrap();
        assert!(result.exhausted());
        assert_eq!(result.aggregate_confidence, 0.0);
        assert_eq!(result.completeness_ratio, 0.0);
        assert_eq!(result.audit.physical.format, DocumentFormat::Image);
        let methods: Vec<AttemptMethod> = result.audit.attempts.iter().map(|a| a.method).collect();
        assert_eq!(methods, vec![AttemptMethod::Ocr, AttemptMethod::DirectText]);
        assert!(result.audit.attempts.iter().all(|a| a.error_detail.is_some()));
    }

    #[test]
    fn ocr_recovers_an_image_only_filing() {
        let result = pipeline(Arc::new(FixedOcr(HOUSE_PTR.to_string())))
            .run(
                &envelope("scan", Some(RecordType::PeriodicTransactionReport)),
                PNG_BYTES,
                &ptr::house_ptr_v1_1(),
            )
            .unwrap();
        assert_eq!(result.outcome, DocumentOutcome::Succeeded);
        assert_eq!(result.method, Some(AttemptMethod::Ocr));
        assert_eq!(result.field("state_district").unwrap().value, "CA05");
    }

    #[test]
    fn partial_attempt_is_kept_when_nothing_better_follows() {
        let thin = "Periodic Transaction Report\nName: Jane Public\nnothing else of note in this filing at all";
        let result = pipeline(Arc::new(DisabledOcr))
            .run(&envelope("thin", Some(RecordType::PeriodicTransactionReport)), thin.as_bytes(), &ptr::house_ptr_v1_1())
            .unwrap();
        assert_eq!(result.outcome, DocumentOutcome::Partial);
        assert_eq!(result.method, Some(AttemptMethod::DirectText));
        assert_eq!(result.audit.attempts.len(), 2);
        assert_eq!(result.audit.attempts[1].outcome, AttemptOutcome::Failed);
    }

    #[test]
    fn record_type_mismatch_is_reported() {
        let err = pipeline(Arc::new(DisabledOcr))
            .run(&envelope("a", None), HOUSE_ANNUAL.as_bytes(), &ptr::house_ptr_v1_1())
            .unwrap_err();
        assert!(matches!(err, PipelineError::RecordTypeMismatch { .. }));
    }

    #[test]
    fn unrecognized_template_is_a_detect_error() {
        let err = pipeline(Arc::new(DisabledOcr))
            .run(
                &envelope("x", None),
                b"Minutes of the garden club meeting, held on Tuesday evening at the library.",
                &annual::house_annual_v1_0(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Detect(_)));
    }

    #[test]
    fn reruns_are_deterministic() {
        let pipeline = pipeline(Arc::new(DisabledOcr));
        let extractor = annual::house_annual_v1_0();
        let doc = envelope("10056789", None);
        let a = pipeline.run(&doc, HOUSE_ANNUAL.as_bytes(), &extractor).unwrap();
        let b = pipeline.run(&doc, HOUSE_ANNUAL.as_bytes(), &extractor).unwrap();
        assert_eq!(a.fields, b.fields);
        assert_eq!(a.sub_records, b.sub_records);
        assert_eq!(a.aggregate_confidence, b.aggregate_confidence);
        assert_eq!(a.completeness_ratio, b.completeness_ratio);
        assert_eq!(a.suspicious_flags, b.suspicious_flags);
    }
}
