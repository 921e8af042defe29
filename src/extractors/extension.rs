// src/extractors/extension.rs
use crate::documents::RecordType;
use crate::extractors::rules::{compile, FieldRules, Matcher, Normalize, Rule};
use crate::extractors::version::{ExtractorVersionId, SemVer};
use crate::extractors::RuleBookExtractor;

pub const CLASS: &str = "house_extension";

/// `house_extension@1.0.0`. Extension requests carry no repeated records.
pub fn house_extension_v1_0() -> RuleBookExtractor {
    let header = vec![
        FieldRules::new(
            "filer_name",
            vec![
                Rule::labeled("extension.filer_name.labeled", r"(?m)^\s*Name(?: of Requestor)?:\s*(.+?)\s*$", Normalize::Name),
                Rule::inferred(
                    "extension.filer_name.signature",
                    Matcher::First(compile(r"(?m)^\s*Digitally Signed:\s*(.+?)\s*,")),
                    Normalize::Name,
                ),
            ],
        ),
        FieldRules::new(
            "report_type",
            vec![
                Rule::labeled(
                    "extension.report_type.labeled",
                    r"(?m)^\s*(?:Report|Statement) Type:\s*(.+?)\s*$",
                    Normalize::Trim,
                ),
                Rule::inferred(
                    "extension.report_type.phrase",
                    Matcher::First(compile(r"(?i)\b(annual report|termination report|new filer report)\b")),
                    Normalize::Trim,
                ),
            ],
        ),
        FieldRules::new(
            "due_date",
            vec![Rule::labeled(
                "extension.due_date.labeled",
                r"(?m)^\s*Statement Due Date:\s*(\S+)",
                Normalize::Date,
            )],
        ),
        FieldRules::new(
            "days_requested",
            vec![
                Rule::labeled("extension.days_requested.labeled", r"(?m)^\s*Days Requested:\s*(\d+)", Normalize::Trim),
                Rule::inferred(
                    "extension.days_requested.phrase",
                    Matcher::First(compile(r"(?i)\b(\d{1,3})[- ]day extension\b")),
                    Normalize::Trim,
                ),
                // The statutory maximum, granted when the form leaves it blank.
                Rule::fallback("extension.days_requested.default_90", "90"),
            ],
        ),
        FieldRules::new(
            "state_district",
            vec![Rule::labeled(
                "extension.state_district.labeled",
                r"(?m)^\s*State/District:\s*([A-Za-z]{2}\s*-?\s*\d{1,2})\b",
                Normalize::District,
            )],
        ),
        FieldRules::new(
            "filing_year",
            vec![Rule::labeled("extension.filing_year.labeled", r"(?m)^\s*Filing Year:\s*(\d{4})\b", Normalize::Trim)],
        ),
        FieldRules::new(
            "request_date",
            vec![Rule::labeled(
                "extension.request_date.labeled",
                r"(?m)^\s*Date of Request:\s*(\S+)",
                Normalize::Date,
            )],
        ),
    ];

    RuleBookExtractor {
        id: ExtractorVersionId::new(RecordType::ExtensionRequest, CLASS, SemVer::new(1, 0, 0)),
        header,
        blocks: None,
    }
}
