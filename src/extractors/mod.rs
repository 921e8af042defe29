// src/extractors/mod.rs
pub mod annual;
pub mod blocks;
pub mod extension;
pub mod ptr;
pub mod rules;
pub mod schema;
pub mod version;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::documents::{AttemptMethod, RecordType};

// Re-export key extraction types for convenience
pub use blocks::{BlockError, BlockMatcher};
pub use rules::{FieldRules, RuleKind, MIN_CONFIDENCE};
pub use schema::{schema_for, FieldSpec, RecordSchema, SubRecordSchema};
pub use version::{ExtractorVersionId, SemVer};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S{4,}").expect("Failed to compile TOKEN_RE"));

/// One extracted datum with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_name: String,
    pub value: String,
    pub confidence: f64,
    pub extraction_rule_id: String,
    pub rule_kind: RuleKind,
    /// Set by the scorer when the value breaks its declared format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

/// One repeated record (transaction line, holding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRecord {
    pub kind: String,
    pub index: usize,
    pub fields: Vec<FieldValue>,
}

impl SubRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.field_name == name)
    }
}

/// In-progress output of one extractor on one text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub fields: Vec<FieldValue>,
    pub sub_records: Vec<SubRecord>,
    pub block_errors: Vec<BlockError>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.sub_records.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.field_name == name)
    }
}

/// Common contract of all extractors. Implementations are pure: the same text and
/// method always produce the same extraction.
pub trait Extractor: Send + Sync {
    fn id(&self) -> &ExtractorVersionId;

    fn schema(&self) -> &'static RecordSchema {
        schema_for(self.id().record_type)
    }

    fn extract(&self, text: &str, method: AttemptMethod) -> Extraction;

    /// `(pattern, rule id)` pairs for rule-trace output.
    fn debug_patterns(&self) -> Vec<(String, String)>;
}

/// An extractor defined entirely by its rule tables.
#[derive(Debug, Clone)]
pub struct RuleBookExtractor {
    pub id: ExtractorVersionId,
    pub header: Vec<FieldRules>,
    pub blocks: Option<BlockMatcher>,
}

impl Extractor for RuleBookExtractor {
    fn id(&self) -> &ExtractorVersionId {
        &self.id
    }

    fn extract(&self, text: &str, method: AttemptMethod) -> Extraction {
        let text = match method {
            AttemptMethod::Ocr => normalize_ocr_digits(text),
            AttemptMethod::DirectText => text.to_string(),
        };

        let fields: Vec<FieldValue> = self
            .header
            .iter()
            .filter_map(|rules| rules.apply(&text))
            .collect();

        let (sub_records, block_errors) = match (&self.blocks, &self.schema().sub_record) {
            (Some(matcher), Some(sub_schema)) => {
                let required: Vec<&str> = sub_schema
                    .fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.name)
                    .collect();
                matcher.extract(&text, &required)
            }
            _ => (Vec::new(), Vec::new()),
        };

        tracing::debug!(
            "{} extracted {} fields, {} sub-records, {} malformed blocks via {}",
            self.id,
            fields.len(),
            sub_records.len(),
            block_errors.len(),
            method
        );
        Extraction {
            fields,
            sub_records,
            block_errors,
        }
    }

    fn debug_patterns(&self) -> Vec<(String, String)> {
        let mut patterns: Vec<(String, String)> = self
            .header
            .iter()
            .flat_map(|field| field.rules.iter())
            .filter_map(|rule| rule.matcher.pattern().map(|p| (p.to_string(), rule.id.to_string())))
            .collect();
        if let Some(matcher) = &self.blocks {
            patterns.push((
                matcher.anchor.as_str().to_string(),
                format!("block.{}.anchor", matcher.kind),
            ));
            patterns.extend(
                matcher
                    .fields
                    .iter()
                    .flat_map(|field| field.rules.iter())
                    .filter_map(|rule| rule.matcher.pattern().map(|p| (p.to_string(), rule.id.to_string()))),
            );
        }
        patterns
    }
}

/// Repairs common OCR letter/digit confusions inside numeric tokens
/// (`O`→`0`, `l`/`I`→`1`, `S`→`5`). Words are left alone: a token is only
/// rewritten when it already contains a digit and nothing but digit-like
/// characters and number punctuation.
pub fn normalize_ocr_digits(text: &str) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            let numeric_like = token.chars().any(|c| c.is_ascii_digit())
                && token
                    .chars()
                    .all(|c| c.is_ascii_digit() || "OlIS$,./-".contains(c));
            if !numeric_like {
                return token.to_string();
            }
            token
                .chars()
                .map(|c| match c {
                    'O' => '0',
                    'l' | 'I' => '1',
                    'S' => '5',
                    other => other,
                })
                .collect()
        })
        .into_owned()
}

/// Every extractor version this build ships.
pub struct ExtractorCatalog {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorCatalog {
    pub fn builtin() -> Self {
        Self::with_extractors(vec![
            Arc::new(ptr::house_ptr_v1_0()),
            Arc::new(ptr::house_ptr_v1_1()),
            Arc::new(annual::house_annual_v1_0()),
            Arc::new(extension::house_extension_v1_0()),
        ])
    }

    pub fn with_extractors(extractors: Vec<Arc<dyn Extractor>>) -> Self {
        Self { extractors }
    }

    pub fn get(&self, id: &ExtractorVersionId) -> Option<Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.id() == id).cloned()
    }

    pub fn list(&self) -> Vec<ExtractorVersionId> {
        let mut ids: Vec<ExtractorVersionId> = self.extractors.iter().map(|e| e.id().clone()).collect();
        ids.sort();
        ids
    }

    /// Highest version shipped for the record type.
    pub fn latest(&self, record_type: RecordType) -> Option<Arc<dyn Extractor>> {
        self.extractors
            .iter()
            .filter(|e| e.id().record_type == record_type)
            .max_by(|a, b| {
                a.id()
                    .version
                    .cmp(&b.id().version)
                    .then_with(|| b.id().extractor_class.cmp(&a.id().extractor_class))
            })
            .cloned()
    }
}
