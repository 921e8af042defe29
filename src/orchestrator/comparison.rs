// src/orchestrator/comparison.rs
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::PromotionPolicy;
use crate::quality::{FieldMetric, QualityMetrics};

/// Differences smaller than this are treated as equal.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Promote,
    Neutral,
    ReviewRequired,
}

/// Baseline vs candidate figures for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub baseline_extraction_rate: f64,
    pub candidate_extraction_rate: f64,
    pub baseline_confidence: f64,
    pub candidate_confidence: f64,
    /// Largest drop in either figure the policy tolerates for this field.
    pub threshold: f64,
    pub regressed: bool,
}

impl FieldDelta {
    pub fn confidence_delta(&self) -> f64 {
        self.candidate_confidence - self.baseline_confidence
    }

    pub fn extraction_rate_delta(&self) -> f64 {
        self.candidate_extraction_rate - self.baseline_extraction_rate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub baseline_version: String,
    pub candidate_version: String,
    pub baseline_sample_size: usize,
    pub candidate_sample_size: usize,
    pub baseline_aggregate: f64,
    pub candidate_aggregate: f64,
    pub aggregate_delta: f64,
    pub deltas_by_field: BTreeMap<String, FieldDelta>,
    pub recommendation: Recommendation,
}

impl ComparisonReport {
    pub fn regressed_fields(&self) -> Vec<&str> {
        self.deltas_by_field
            .iter()
            .filter(|(_, delta)| delta.regressed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Compares candidate quality against the production baseline over the same population.
///
/// - `REVIEW_REQUIRED` if any field's extraction rate or mean confidence drops by more
///   than its threshold, or the baseline has nothing to compare against.
/// - `PROMOTE` if nothing regressed and the aggregate confidence rose by at least
///   `min_aggregate_improvement`.
/// - `NEUTRAL` otherwise.
pub fn compare(
    baseline_version: &str,
    baseline: &QualityMetrics,
    candidate_version: &str,
    candidate: &QualityMetrics,
    policy: &PromotionPolicy,
) -> ComparisonReport {
    let missing = FieldMetric {
        expected: 0,
        extraction_rate: 0.0,
        mean_confidence: 0.0,
    };
    let names: BTreeSet<&String> = baseline
        .per_field
        .keys()
        .chain(candidate.per_field.keys())
        .collect();

    let deltas_by_field: BTreeMap<String, FieldDelta> = names
        .into_iter()
        .map(|name| {
            let before = baseline.per_field.get(name).unwrap_or(&missing);
            let after = candidate.per_field.get(name).unwrap_or(&missing);
            let threshold = policy.threshold_for(name);
            let drop = (before.extraction_rate - after.extraction_rate)
                .max(before.mean_confidence - after.mean_confidence);
            let delta = FieldDelta {
                baseline_extraction_rate: before.extraction_rate,
                candidate_extraction_rate: after.extraction_rate,
                baseline_confidence: before.mean_confidence,
                candidate_confidence: after.mean_confidence,
                threshold,
                regressed: drop > threshold + EPSILON,
            };
            (name.clone(), delta)
        })
        .collect();

    let aggregate_delta = candidate.aggregate_confidence - baseline.aggregate_confidence;
    let any_regression = deltas_by_field.values().any(|d| d.regressed);
    let recommendation = if baseline.sample_size == 0 || any_regression {
        Recommendation::ReviewRequired
    } else if aggregate_delta >= policy.min_aggregate_improvement - EPSILON {
        Recommendation::Promote
    } else {
        Recommendation::Neutral
    };

    ComparisonReport {
        baseline_version: baseline_version.to_string(),
        candidate_version: candidate_version.to_string(),
        baseline_sample_size: baseline.sample_size,
        candidate_sample_size: candidate.sample_size,
        baseline_aggregate: baseline.aggregate_confidence,
        candidate_aggregate: candidate.aggregate_confidence,
        aggregate_delta,
        deltas_by_field,
        recommendation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(aggregate: f64, fields: &[(&str, f64, f64)]) -> QualityMetrics {
        QualityMetrics {
            sample_size: 40,
            failed_documents: 0,
            aggregate_confidence: aggregate,
            mean_completeness: 0.9,
            per_field: fields
                .iter()
                .map(|(name, rate, confidence)| {
                    (
                        name.to_string(),
                        FieldMetric {
                            expected: 40,
                            extraction_rate: *rate,
                            mean_confidence: *confidence,
                        },
                    )
                })
                .collect(),
        }
    }

    fn run(baseline: &QualityMetrics, candidate: &QualityMetrics) -> ComparisonReport {
        compare("house_ptr@1.0.0", baseline, "house_ptr@1.1.0", candidate, &PromotionPolicy::default())
    }

    #[test]
    fn improvement_without_regression_promotes() {
        let baseline = metrics(0.87, &[("filer_name", 1.0, 0.95), ("transaction.amount", 0.8, 0.6)]);
        let candidate = metrics(0.94, &[("filer_name", 1.0, 0.95), ("transaction.amount", 0.95, 0.9)]);
        let report = run(&baseline, &candidate);
        assert_eq!(report.recommendation, Recommendation::Promote);
        assert!((report.aggregate_delta - 0.07).abs() < 1e-9);
        assert!(report.regressed_fields().is_empty());
    }

    #[test]
    fn required_field_regression_needs_review() {
        let baseline = metrics(0.87, &[("filer_name", 1.0, 0.96)]);
        let candidate = metrics(0.94, &[("filer_name", 1.0, 0.70)]);
        let report = run(&baseline, &candidate);
        assert_eq!(report.recommendation, Recommendation::ReviewRequired);
        assert_eq!(report.regressed_fields(), vec!["filer_name"]);
        assert!((report.deltas_by_field["filer_name"].confidence_delta() + 0.26).abs() < 1e-9);
    }

    #[test]
    fn extraction_rate_regression_alone_needs_review() {
        let baseline = metrics(0.87, &[("filing_date", 0.96, 0.9), ("filer_name", 1.0, 0.95)]);
        let candidate = metrics(0.94, &[("filing_date", 0.70, 0.9), ("filer_name", 1.0, 0.95)]);
        let report = run(&baseline, &candidate);
        assert_eq!(report.recommendation, Recommendation::ReviewRequired);
        assert_eq!(report.regressed_fields(), vec!["filing_date"]);
        let delta = &report.deltas_by_field["filing_date"];
        assert!((delta.extraction_rate_delta() + 0.26).abs() < 1e-9);
        assert_eq!(delta.confidence_delta(), 0.0);
        assert!((report.aggregate_delta - 0.07).abs() < 1e-9);
    }

    #[test]
    fn small_gains_and_tolerated_drops_are_neutral() {
        let baseline = metrics(0.90, &[("filer_name", 1.0, 0.95)]);
        let candidate = metrics(0.91, &[("filer_name", 0.97, 0.92)]);
        assert_eq!(run(&baseline, &candidate).recommendation, Recommendation::Neutral);
    }

    #[test]
    fn field_thresholds_override_the_default() {
        let baseline = metrics(0.87, &[("filer_status", 0.9, 0.8)]);
        let candidate = metrics(0.94, &[("filer_status", 0.8, 0.7)]);
        let mut policy = PromotionPolicy::default();
        assert_eq!(
            compare("a@1.0.0", &baseline, "a@1.1.0", &candidate, &policy).recommendation,
            Recommendation::ReviewRequired
        );
        policy.field_thresholds.insert("filer_status".to_string(), 0.2);
        assert_eq!(
            compare("a@1.0.0", &baseline, "a@1.1.0", &candidate, &policy).recommendation,
            Recommendation::Promote
        );
    }

    #[test]
    fn empty_baseline_needs_review() {
        let candidate = metrics(0.94, &[("filer_name", 1.0, 0.95)]);
        let report = run(&QualityMetrics::default(), &candidate);
        assert_eq!(report.recommendation, Recommendation::ReviewRequired);
    }

    #[test]
    fn recommendation_serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_string(&Recommendation::ReviewRequired).unwrap(),
            "\"REVIEW_REQUIRED\""
        );
    }
}
