// src/registry/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::RecordType;
use crate::extractors::{ExtractorVersionId, SemVer};
use crate::orchestrator::comparison::ComparisonReport;
use crate::quality::QualityMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStage {
    Deployed,
    UnderReview,
    Production,
    Retired,
}

/// One deployed extractor version. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorVersion {
    pub id: ExtractorVersionId,
    pub deployed_at: DateTime<Utc>,
    pub changelog: String,
    /// Stored stage. `Production` is never stored; it is resolved from the pointer.
    pub stage: VersionStage,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default)]
    pub quality_metrics: Option<QualityMetrics>,
    /// Comparison against the production baseline from the last review run.
    #[serde(default)]
    pub comparison: Option<ComparisonReport>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Bumped by every stored update.
    #[serde(default)]
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerAction {
    Promote,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerChange {
    pub from: Option<SemVer>,
    pub to: SemVer,
    pub action: PointerAction,
    pub at: DateTime<Utc>,
}

/// The single mutable record per (record type, extractor class): which version is
/// production. Every write bumps `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionPointer {
    pub record_type: RecordType,
    pub extractor_class: String,
    pub production: Option<SemVer>,
    pub revision: u64,
    #[serde(default)]
    pub history: Vec<PointerChange>,
}

impl ProductionPointer {
    /// The pointer of a pair nobody has promoted yet.
    pub fn empty(record_type: RecordType, extractor_class: &str) -> Self {
        Self {
            record_type,
            extractor_class: extractor_class.to_string(),
            production: None,
            revision: 0,
            history: Vec::new(),
        }
    }

    pub fn production_id(&self) -> Option<ExtractorVersionId> {
        self.production
            .map(|version| ExtractorVersionId::new(self.record_type, self.extractor_class.clone(), version))
    }

    /// Whether `version` has been production at some point.
    pub fn was_production(&self, version: SemVer) -> bool {
        self.history.iter().any(|change| change.to == version)
    }

    /// Next pointer state pointing at `to`, with the history entry appended.
    pub fn moved_to(&self, to: SemVer, action: PointerAction) -> Self {
        let mut next = self.clone();
        next.history.push(PointerChange {
            from: self.production,
            to,
            action,
            at: Utc::now(),
        });
        next.production = Some(to);
        next.revision = self.revision + 1;
        next
    }
}
