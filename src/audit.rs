// src/audit.rs
//! Per-document audit trail: every attempt in order, the physical properties
//! of the document and where the time went. Pure bookkeeping.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::{AttemptMethod, PhysicalProperties};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Detection,
    Extraction,
    Scoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Partial,
    Failed,
}

/// One try at one extraction method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub method: AttemptMethod,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
}

/// Wall-clock milliseconds per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub detection_ms: f64,
    pub extraction_ms: f64,
    pub scoring_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub attempt_order: Vec<AttemptMethod>,
    pub attempts: Vec<ExtractionAttempt>,
    pub physical: PhysicalProperties,
    /// Template the detector matched, when it fingerprinted the document.
    pub template_id: Option<String>,
    pub timings: PhaseTimings,
}

pub struct AuditTrailBuilder {
    started: Instant,
    physical: PhysicalProperties,
    attempt_order: Vec<AttemptMethod>,
    attempts: Vec<ExtractionAttempt>,
    template_id: Option<String>,
    detection: Duration,
    extraction: Duration,
    scoring: Duration,
}

impl AuditTrailBuilder {
    pub fn new(physical: PhysicalProperties) -> Self {
        Self {
            started: Instant::now(),
            physical,
            attempt_order: Vec::new(),
            attempts: Vec::new(),
            template_id: None,
            detection: Duration::ZERO,
            extraction: Duration::ZERO,
            scoring: Duration::ZERO,
        }
    }

    /// Starts the total clock at `started` rather than now.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    pub fn detection(&mut self, attempt_order: Vec<AttemptMethod>, template_id: Option<String>) {
        self.attempt_order = attempt_order;
        self.template_id = template_id;
    }

    pub fn add_phase(&mut self, phase: Phase, elapsed: Duration) {
        match phase {
            Phase::Detection => self.detection += elapsed,
            Phase::Extraction => self.extraction += elapsed,
            Phase::Scoring => self.scoring += elapsed,
        }
    }

    /// Runs `f` and charges its wall-clock time to `phase`.
    pub fn time_phase<T>(&mut self, phase: Phase, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.add_phase(phase, start.elapsed());
        out
    }

    pub fn record_attempt(
        &mut self,
        method: AttemptMethod,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: AttemptOutcome,
        error_detail: Option<String>,
    ) {
        self.attempts.push(ExtractionAttempt {
            method,
            started_at,
            duration_ms: millis(elapsed),
            outcome,
            error_detail,
        });
    }

    pub fn attempts(&self) -> &[ExtractionAttempt] {
        &self.attempts
    }

    pub fn build(self) -> AuditTrail {
        AuditTrail {
            attempt_order: self.attempt_order,
            attempts: self.attempts,
            physical: self.physical,
            template_id: self.template_id,
            timings: PhaseTimings {
                detection_ms: millis(self.detection),
                extraction_ms: millis(self.extraction),
                scoring_ms: millis(self.scoring),
                total_ms: millis(self.started.elapsed()),
            },
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
