// src/detector/mod.rs
pub mod templates;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::documents::{AttemptMethod, DocumentEnvelope, PhysicalProperties, RecordType};
use crate::utils::error::DetectError;

pub use templates::{builtin_templates, Template};

/// Slack when checking a score against the minimum.
const TIE_EPSILON: f64 = 1e-9;

/// What the detector decided for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub record_type: RecordType,
    pub attempt_order: Vec<AttemptMethod>,
    pub template_id: Option<String>,
    pub match_score: Option<f64>,
}

/// A template and how well the document matched it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub template_id: &'static str,
    pub record_type: RecordType,
    pub score: f64,
    pub structural_variance: f64,
}

pub struct TemplateDetector {
    templates: Vec<Template>,
    min_match_score: f64,
}

impl TemplateDetector {
    pub fn new(min_match_score: f64) -> Self {
        Self::with_templates(builtin_templates(), min_match_score)
    }

    pub fn with_templates(templates: Vec<Template>, min_match_score: f64) -> Self {
        Self {
            templates,
            min_match_score,
        }
    }

    /// Text layer present: read it first. Image-only: OCR first.
    pub fn attempt_order(physical: &PhysicalProperties) -> Vec<AttemptMethod> {
        if physical.has_text_layer {
            vec![AttemptMethod::DirectText, AttemptMethod::Ocr]
        } else {
            vec![AttemptMethod::Ocr, AttemptMethod::DirectText]
        }
    }

    /// Every template's score, best first. Ties go to the lower structural variance.
    pub fn fingerprint(&self, text: &str, page_count: u32) -> Vec<TemplateMatch> {
        let lowered = text.to_lowercase();
        let mut matches: Vec<TemplateMatch> = self
            .templates
            .iter()
            .map(|t| TemplateMatch {
                template_id: t.id,
                record_type: t.record_type,
                score: t.score(&lowered, page_count),
                structural_variance: t.structural_variance,
            })
            .collect();
        matches.sort_by(rank);
        matches
    }

    /// Decides the record type and attempt order. `text` is the decoded text layer, if any.
    pub fn detect(
        &self,
        envelope: &DocumentEnvelope,
        physical: &PhysicalProperties,
        text: Option<&str>,
    ) -> Result<Detection, DetectError> {
        let attempt_order = Self::attempt_order(physical);
        let best = text.and_then(|t| {
            self.fingerprint(t, physical.page_count)
                .into_iter()
                .filter(|m| envelope.record_type.map_or(true, |hint| hint == m.record_type))
                .find(|m| m.score + TIE_EPSILON >= self.min_match_score)
        });

        if let Some(hint) = envelope.record_type {
            return Ok(Detection {
                record_type: hint,
                attempt_order,
                template_id: best.as_ref().map(|m| m.template_id.to_string()),
                match_score: best.map(|m| m.score),
            });
        }

        let Some(text) = text else {
            return Err(DetectError::UnrecognizedTemplate {
                doc_id: envelope.doc_id.clone(),
                reason: "image-only document without a record type hint".to_string(),
            });
        };

        match best {
            Some(m) => {
                tracing::debug!(
                    "Document {} matched template {} (score {:.3})",
                    envelope.doc_id,
                    m.template_id,
                    m.score
                );
                Ok(Detection {
                    record_type: m.record_type,
                    attempt_order,
                    template_id: Some(m.template_id.to_string()),
                    match_score: Some(m.score),
                })
            }
            None => {
                let top = self
                    .fingerprint(text, physical.page_count)
                    .into_iter()
                    .next()
                    .map(|m| format!("best match {} scored {:.3}", m.template_id, m.score))
                    .unwrap_or_else(|| "no templates configured".to_string());
                Err(DetectError::UnrecognizedTemplate {
                    doc_id: envelope.doc_id.clone(),
                    reason: format!("no template reached {:.2}; {}", self.min_match_score, top),
                })
            }
        }
    }
}

/// Scores are compared at this resolution so float noise cannot break a tie.
const SCORE_RESOLUTION: f64 = 1e-6;

fn score_bucket(score: f64) -> i64 {
    (score / SCORE_RESOLUTION).round() as i64
}

/// Best first: higher score bucket, then lower structural variance, then template id.
fn rank(a: &TemplateMatch, b: &TemplateMatch) -> Ordering {
    score_bucket(b.score)
        .cmp(&score_bucket(a.score))
        .then_with(|| a.structural_variance.total_cmp(&b.structural_variance))
        .then_with(|| a.template_id.cmp(b.template_id))
}
