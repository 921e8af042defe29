// src/extractors/annual.rs
//! Annual financial disclosure report rule book (`house_annual`). Holdings come
//! from Schedule A; the other schedules are not extracted.

use crate::documents::RecordType;
use crate::extractors::blocks::BlockMatcher;
use crate::extractors::rules::{compile, FieldRules, Matcher, Normalize, Rule};
use crate::extractors::version::{ExtractorVersionId, SemVer};
use crate::extractors::RuleBookExtractor;

pub const CLASS: &str = "house_annual";

const AMOUNT: &str = r"(\$[\d,]+\s*-\s*\$[\d,]+|(?i:over)\s*\$[\d,]+)";

fn header_rules() -> Vec<FieldRules> {
    vec![
        FieldRules::new(
            "filer_name",
            vec![
                Rule::labeled("annual.filer_name.labeled", r"(?m)^\s*Name:\s*(.+?)\s*$", Normalize::Name),
                Rule::inferred(
                    "annual.filer_name.signature",
                    Matcher::First(compile(r"(?m)^\s*Digitally Signed:\s*(.+?)\s*,")),
                    Normalize::Name,
                ),
            ],
        ),
        FieldRules::new(
            "filing_year",
            vec![
                Rule::labeled("annual.filing_year.labeled", r"(?m)^\s*Filing Year:\s*(\d{4})\b", Normalize::Trim),
                Rule::inferred(
                    "annual.filing_year.calendar_year",
                    Matcher::First(compile(r"(?i)\bcalendar year\s+(\d{4})\b")),
                    Normalize::Trim,
                ),
            ],
        ),
        FieldRules::new(
            "filing_date",
            vec![
                Rule::labeled("annual.filing_date.labeled", r"(?m)^\s*Filing Date:\s*(\S+)", Normalize::Date),
                Rule::inferred(
                    "annual.filing_date.signature",
                    Matcher::First(compile(r"(?m)^\s*Digitally Signed:.*,\s*(\d{1,2}/\d{1,2}/\d{4})")),
                    Normalize::Date,
                ),
            ],
        ),
        FieldRules::new(
            "state_district",
            vec![Rule::labeled(
                "annual.state_district.labeled",
                r"(?m)^\s*State/District:\s*([A-Za-z]{2}\s*-?\s*\d{1,2})\b",
                Normalize::District,
            )],
        ),
        FieldRules::new(
            "filer_status",
            vec![Rule::labeled("annual.filer_status.labeled", r"(?m)^\s*Status:\s*(.+?)\s*$", Normalize::Trim)],
        ),
        FieldRules::new(
            "filing_type",
            vec![Rule::labeled("annual.filing_type.labeled", r"(?m)^\s*Filing Type:\s*(.+?)\s*$", Normalize::Trim)],
        ),
        FieldRules::new(
            "filing_id",
            vec![Rule::labeled("annual.filing_id.labeled", r"Filing ID\s*#\s*(\d+)", Normalize::Trim)],
        ),
    ]
}

fn holding_rules() -> Vec<FieldRules> {
    vec![
        FieldRules::new(
            "asset_name",
            vec![Rule::inferred(
                "annual.asset_name.row",
                Matcher::First(compile(r"\A(.+?)\s*\[[A-Z]{2}\]")),
                Normalize::Trim,
            )],
        ),
        FieldRules::new(
            "asset_type",
            vec![Rule::inferred("annual.asset_type.code", Matcher::First(compile(r"\[([A-Z]{2})\]")), Normalize::Upper)],
        ),
        FieldRules::new(
            "owner",
            vec![
                Rule::inferred("annual.owner.after_code", Matcher::First(compile(r"\]\s+(SP|DC|JT)\b")), Normalize::Upper),
                Rule::fallback("annual.owner.default_self", "SELF"),
            ],
        ),
        FieldRules::new(
            "value",
            vec![
                Rule::labeled("annual.value.labeled", r"(?m)^\s*Value:\s*(.+?)\s*$", Normalize::Amount),
                Rule::inferred("annual.value.first_amount", Matcher::Nth(compile(AMOUNT), 0), Normalize::Amount),
            ],
        ),
        FieldRules::new(
            "income_type",
            vec![Rule::inferred(
                "annual.income_type.keyword",
                Matcher::First(compile(r"\b(Dividends|Interest|Capital Gains|Rent|Royalties|Tax-Deferred)\b")),
                Normalize::Trim,
            )],
        ),
        FieldRules::new(
            "income_amount",
            vec![Rule::inferred(
                "annual.income_amount.second_amount",
                Matcher::Nth(compile(AMOUNT), 1),
                Normalize::Amount,
            )],
        ),
        FieldRules::new(
            "location",
            vec![Rule::labeled("annual.location.labeled", r"(?m)^\s*Location:\s*(.+?)\s*$", Normalize::Trim)],
        ),
        FieldRules::new(
            "description",
            vec![Rule::labeled("annual.description.labeled", r"(?m)^\s*D(?:escription)?:\s*(.+?)\s*$", Normalize::Trim)],
        ),
    ]
}

/// `house_annual@1.0.0`.
pub fn house_annual_v1_0() -> RuleBookExtractor {
    RuleBookExtractor {
        id: ExtractorVersionId::new(RecordType::AnnualReport, CLASS, SemVer::new(1, 0, 0)),
        header: header_rules(),
        blocks: Some(BlockMatcher {
            kind: "holding",
            table_start: compile(r"(?i)^Schedule A\b"),
            table_end: compile(r"(?i)^(?:Schedule [B-J]\b|Certification and Signature)"),
            anchor: compile(r"\[[A-Z]{2}\]"),
            merge_wrapped_prefix: false,
            fields: holding_rules(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::AttemptMethod;
    use crate::extractors::Extractor;
    use crate::fixtures::HOUSE_ANNUAL;

    #[test]
    fn header_and_holdings() {
        let extraction = house_annual_v1_0().extract(&HOUSE_ANNUAL.replace('\x0c', "\n"), AttemptMethod::DirectText);
        assert_eq!(extraction.field("filer_name").unwrap().value, "John Doe");
        assert_eq!(extraction.field("filing_year").unwrap().value, "2022");
        assert_eq!(extraction.field("filing_date").unwrap().value, "2023-05-15");
        assert_eq!(extraction.field("filing_type").unwrap().value, "Annual Report");
        assert_eq!(extraction.field("state_district").unwrap().value, "TX12");

        assert_eq!(extraction.sub_records.len(), 2);
        let apple = &extraction.sub_records[0];
        assert_eq!(apple.field("asset_name").unwrap().value, "Apple Inc. (AAPL)");
        assert_eq!(apple.field("owner").unwrap().value, "SP");
        assert_eq!(apple.field("value").unwrap().value, "$15,001 - $50,000");
        assert_eq!(apple.field("income_type").unwrap().value, "Dividends");
        assert_eq!(apple.field("income_amount").unwrap().value, "$201 - $1,000");
        assert_eq!(apple.field("location").unwrap().value, "US");

        let rental = &extraction.sub_records[1];
        assert_eq!(rental.field("asset_type").unwrap().value, "RP");
        assert_eq!(rental.field("owner").unwrap().value, "JT");
        assert_eq!(rental.field("income_type").unwrap().value, "Rent");
    }

    #[test]
    fn schedule_c_rows_are_not_holdings() {
        let extraction = house_annual_v1_0().extract(HOUSE_ANNUAL, AttemptMethod::DirectText);
        assert!(extraction
            .sub_records
            .iter()
            .all(|r| r.field("asset_name").map(|f| !f.value.contains("State of Texas")).unwrap_or(true)));
        assert!(extraction.block_errors.is_empty());
    }
}
