// src/quality/metrics.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::extractors::schema_for;
use crate::pipeline::{DocumentOutcome, ExtractionResult};

/// Per-document count of one field: how often it was expected and found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldTally {
    pub expected: u32,
    pub extracted: u32,
    pub confidence_sum: f64,
}

/// The slice of an `ExtractionResult` that version-level metrics are built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub doc_id: String,
    pub outcome: DocumentOutcome,
    pub aggregate_confidence: f64,
    pub completeness_ratio: f64,
    /// Keyed by field name; sub-record fields as `kind.field`.
    pub fields: BTreeMap<String, FieldTally>,
}

impl From<&ExtractionResult> for ResultSummary {
    fn from(result: &ExtractionResult) -> Self {
        let schema = schema_for(result.record_type);
        let mut fields = BTreeMap::new();

        for spec in &schema.fields {
            let found = result.fields.iter().find(|f| f.field_name == spec.name);
            fields.insert(
                spec.name.to_string(),
                FieldTally {
                    expected: 1,
                    extracted: u32::from(found.is_some()),
                    confidence_sum: found.map(|f| f.confidence).unwrap_or(0.0),
                },
            );
        }

        if let Some(sub_schema) = &schema.sub_record {
            let blocks = (result.sub_records.len() + result.block_errors.len()) as u32;
            if blocks > 0 {
                for spec in &sub_schema.fields {
                    let mut tally = FieldTally {
                        expected: blocks,
                        ..Default::default()
                    };
                    for value in result.sub_records.iter().filter_map(|r| r.field(spec.name)) {
                        tally.extracted += 1;
                        tally.confidence_sum += value.confidence;
                    }
                    fields.insert(format!("{}.{}", sub_schema.kind, spec.name), tally);
                }
            }
        }

        Self {
            doc_id: result.doc_id.clone(),
            outcome: result.outcome,
            aggregate_confidence: result.aggregate_confidence,
            completeness_ratio: result.completeness_ratio,
            fields,
        }
    }
}

/// Population-level figures for one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldMetric {
    pub expected: u64,
    /// Share of expected occurrences that were extracted.
    pub extraction_rate: f64,
    /// Mean confidence over expected occurrences, missing ones counting zero.
    pub mean_confidence: f64,
}

/// Quality of one extractor version over a document population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub sample_size: usize,
    pub failed_documents: usize,
    pub aggregate_confidence: f64,
    pub mean_completeness: f64,
    pub per_field: BTreeMap<String, FieldMetric>,
}

impl QualityMetrics {
    pub fn from_summaries(summaries: &[ResultSummary]) -> Self {
        if summaries.is_empty() {
            return Self::default();
        }
        // Fixed summation order keeps the figures reproducible.
        let mut ordered: Vec<&ResultSummary> = summaries.iter().collect();
        ordered.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

        let n = ordered.len() as f64;
        let aggregate_confidence = ordered.iter().map(|s| s.aggregate_confidence).sum::<f64>() / n;
        let mean_completeness = ordered.iter().map(|s| s.completeness_ratio).sum::<f64>() / n;
        let failed_documents = ordered
            .iter()
            .filter(|s| s.outcome == DocumentOutcome::Failed)
            .count();

        let mut totals: BTreeMap<&str, FieldTally> = BTreeMap::new();
        for summary in &ordered {
            for (name, tally) in &summary.fields {
                let total = totals.entry(name.as_str()).or_default();
                total.expected += tally.expected;
                total.extracted += tally.extracted;
                total.confidence_sum += tally.confidence_sum;
            }
        }
        let per_field = totals
            .into_iter()
            .filter(|(_, t)| t.expected > 0)
            .map(|(name, t)| {
                (
                    name.to_string(),
                    FieldMetric {
                        expected: u64::from(t.expected),
                        extraction_rate: f64::from(t.extracted) / f64::from(t.expected),
                        mean_confidence: (t.confidence_sum / f64::from(t.expected)).clamp(0.0, 1.0),
                    },
                )
            })
            .collect();

        Self {
            sample_size: ordered.len(),
            failed_documents,
            aggregate_confidence,
            mean_completeness,
            per_field,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetric> {
        self.per_field.get(name)
    }
}
