// src/quality/mod.rs
pub mod flags;
pub mod metrics;

use serde::{Deserialize, Serialize};

use crate::extractors::{
    BlockError, Extraction, FieldSpec, FieldValue, RecordSchema, SubRecord, MIN_CONFIDENCE,
};

pub use flags::SuspiciousFlag;
pub use metrics::{FieldMetric, FieldTally, QualityMetrics, ResultSummary};

/// Field values after validation, with the document-level quality figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredExtraction {
    pub fields: Vec<FieldValue>,
    pub sub_records: Vec<SubRecord>,
    pub block_errors: Vec<BlockError>,
    pub aggregate_confidence: f64,
    pub completeness_ratio: f64,
    pub suspicious_flags: Vec<SuspiciousFlag>,
}

/// Validates field values against the record schema and computes aggregate
/// confidence, completeness and suspicious flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, schema: &RecordSchema, extraction: Extraction, page_count: u32) -> ScoredExtraction {
        let Extraction {
            mut fields,
            mut sub_records,
            block_errors,
        } = extraction;
        let mut flags = Vec::new();

        for value in fields.iter_mut() {
            if let Some(spec) = schema.field(&value.field_name) {
                validate(spec, value, None, &mut flags);
            }
        }
        if let Some(sub_schema) = &schema.sub_record {
            for record in sub_records.iter_mut() {
                for value in record.fields.iter_mut() {
                    if let Some(spec) = sub_schema.field(&value.field_name) {
                        validate(spec, value, Some(sub_schema.kind), &mut flags);
                    }
                }
            }
        }

        let aggregate_confidence = aggregate(schema, &fields, &sub_records, block_errors.len());
        let completeness_ratio = completeness(schema, &fields, &sub_records, block_errors.len());

        if let Some(sub_schema) = &schema.sub_record {
            if sub_schema.usually_present && sub_records.is_empty() && page_count >= 2 {
                flags.push(SuspiciousFlag::NoSubRecordsOnMultiPage {
                    page_count,
                    sub_record_kind: sub_schema.kind.to_string(),
                });
            }
        }
        if completeness_ratio < schema.completeness_floor {
            flags.push(SuspiciousFlag::CompletenessBelowFloor {
                completeness: completeness_ratio,
                floor: schema.completeness_floor,
            });
        }

        tracing::debug!(
            "Scored {} extraction: aggregate {:.3}, completeness {:.3}, {} flags",
            schema.record_type,
            aggregate_confidence,
            completeness_ratio,
            flags.len()
        );

        ScoredExtraction {
            fields,
            sub_records,
            block_errors,
            aggregate_confidence,
            completeness_ratio,
            suspicious_flags: flags,
        }
    }
}

fn validate(spec: &FieldSpec, value: &mut FieldValue, kind: Option<&str>, flags: &mut Vec<SuspiciousFlag>) {
    if let Err(err) = spec.validate(&value.value) {
        tracing::debug!("{}", err);
        value.confidence = MIN_CONFIDENCE;
        value.validation_error = Some(err.reason.clone());
        let field = match kind {
            Some(kind) => format!("{}.{}", kind, err.field),
            None => err.field,
        };
        flags.push(SuspiciousFlag::FieldOutOfRange {
            field,
            value: err.value,
            reason: err.reason,
        });
    }
}

fn confidence_of(values: &[FieldValue], name: &str) -> Option<f64> {
    values
        .iter()
        .find(|v| v.field_name == name)
        .map(|v| v.confidence)
}

/// Importance-weighted mean. Missing required fields count zero, missing optional
/// fields are left out; each sub-record field contributes one term, the mean over
/// all located blocks (malformed blocks count zero for required fields).
fn aggregate(schema: &RecordSchema, fields: &[FieldValue], sub_records: &[SubRecord], failed_blocks: usize) -> f64 {
    let mut weighted = 0.0;
    let mut weights = 0.0;

    for spec in &schema.fields {
        let confidence = match confidence_of(fields, spec.name) {
            Some(c) => c,
            None if spec.required => 0.0,
            None => continue,
        };
        weighted += spec.importance * confidence;
        weights += spec.importance;
    }

    if let Some(sub_schema) = &schema.sub_record {
        for spec in &sub_schema.fields {
            let mut terms: Vec<f64> = sub_records
                .iter()
                .filter_map(|record| match confidence_of(&record.fields, spec.name) {
                    Some(c) => Some(c),
                    None if spec.required => Some(0.0),
                    None => None,
                })
                .collect();
            if spec.required {
                terms.extend(std::iter::repeat(0.0).take(failed_blocks));
            }
            if terms.is_empty() {
                continue;
            }
            let mean = terms.iter().sum::<f64>() / terms.len() as f64;
            weighted += spec.importance * mean;
            weights += spec.importance;
        }
    }

    ratio(weighted, weights)
}

/// Non-null required fields over required fields, across the header and every located block.
fn completeness(schema: &RecordSchema, fields: &[FieldValue], sub_records: &[SubRecord], failed_blocks: usize) -> f64 {
    let mut required = schema.required_count();
    let mut present = schema
        .fields
        .iter()
        .filter(|spec| spec.required && confidence_of(fields, spec.name).is_some())
        .count();

    if let Some(sub_schema) = &schema.sub_record {
        let per_block = sub_schema.required_count();
        required += per_block * (sub_records.len() + failed_blocks);
        present += sub_records
            .iter()
            .map(|record| {
                sub_schema
                    .fields
                    .iter()
                    .filter(|spec| spec.required && record.field(spec.name).is_some())
                    .count()
            })
            .sum::<usize>();
    }

    ratio(present as f64, required as f64)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
