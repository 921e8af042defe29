// src/quality/flags.rs
use serde::{Deserialize, Serialize};

/// Advisory warnings attached to a result. Never an extraction failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum SuspiciousFlag {
    /// A multi-page document of a type that usually carries sub-records yielded none.
    NoSubRecordsOnMultiPage { page_count: u32, sub_record_kind: String },
    /// Completeness fell below the record type's floor.
    CompletenessBelowFloor { completeness: f64, floor: f64 },
    /// A value broke its declared format or range.
    FieldOutOfRange { field: String, value: String, reason: String },
}

impl SuspiciousFlag {
    pub fn code(&self) -> &'static str {
        match self {
            SuspiciousFlag::NoSubRecordsOnMultiPage { .. } => "no_sub_records_on_multi_page",
            SuspiciousFlag::CompletenessBelowFloor { .. } => "completeness_below_floor",
            SuspiciousFlag::FieldOutOfRange { .. } => "field_out_of_range",
        }
    }
}
