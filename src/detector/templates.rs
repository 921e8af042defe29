// src/detector/templates.rs
use std::ops::RangeInclusive;

use crate::documents::RecordType;

/// Structural fingerprint of one known form layout.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: &'static str,
    pub record_type: RecordType,
    /// Lower-case phrases expected near the top of the form.
    pub header_keywords: &'static [&'static str],
    /// Lower-case section headings expected in the body.
    pub section_markers: &'static [&'static str],
    pub page_range: RangeInclusive<u32>,
    /// How loosely the template describes its layout; the stricter template wins ties.
    pub structural_variance: f64,
}

pub fn builtin_templates() -> Vec<Template> {
    vec![
        Template {
            id: "house_ptr",
            record_type: RecordType::PeriodicTransactionReport,
            header_keywords: &["periodic transaction report", "clerk of the house", "filing id", "state/district"],
            section_markers: &["transactions", "notification date", "asset", "certification and signature"],
            page_range: 1..=30,
            structural_variance: 0.2,
        },
        Template {
            id: "senate_ptr",
            record_type: RecordType::PeriodicTransactionReport,
            header_keywords: &["periodic transaction report", "secretary of the senate", "united states senate"],
            section_markers: &["transactions", "transaction type"],
            page_range: 1..=30,
            structural_variance: 0.3,
        },
        Template {
            id: "house_annual",
            record_type: RecordType::AnnualReport,
            header_keywords: &["financial disclosure report", "clerk of the house", "filing year", "state/district"],
            section_markers: &["schedule a", "schedule c", "schedule d", "certification and signature"],
            page_range: 2..=200,
            structural_variance: 0.25,
        },
        Template {
            id: "generic_annual",
            record_type: RecordType::AnnualReport,
            header_keywords: &["financial disclosure", "annual report"],
            section_markers: &["schedule a"],
            page_range: 1..=500,
            structural_variance: 0.8,
        },
        Template {
            id: "house_extension",
            record_type: RecordType::ExtensionRequest,
            header_keywords: &["extension request", "clerk of the house", "days requested"],
            section_markers: &["statement due date", "date of request"],
            page_range: 1..=3,
            structural_variance: 0.15,
        },
    ]
}

impl Template {
    /// 0.6 x header keywords found + 0.3 x section markers found + 0.1 if the page
    /// count is in range. `lowered` must already be lower-case.
    pub fn score(&self, lowered: &str, page_count: u32) -> f64 {
        let keywords = fraction_found(self.header_keywords, lowered);
        let markers = fraction_found(self.section_markers, lowered);
        let pages = if self.page_range.contains(&page_count) { 1.0 } else { 0.0 };
        0.6 * keywords + 0.3 * markers + 0.1 * pages
    }
}

fn fraction_found(phrases: &[&str], lowered: &str) -> f64 {
    if phrases.is_empty() {
        return 0.0;
    }
    let found = phrases.iter().filter(|p| lowered.contains(*p)).count();
    found as f64 / phrases.len() as f64
}
