// src/extractors/ptr.rs
//! Periodic transaction report rule books (`house_ptr`).
//!
//! Field precedence, per field:
//! - `filer_name`: `Name:` label, then the digital signature line.
//! - `state_district`, `filer_status`, `filing_id`: label only.
//! - `filing_date`: the date on the digital signature line.
//! - transaction rows (1.0.0): positions on the row line; owner defaults to `SELF`.
//! - transaction rows (1.1.0): `Ticker:`, `Amount:`, `D:` and `F S:` labels first, then
//!   the 1.0.0 positions; wrapped asset names above a row are joined onto it.

use crate::documents::RecordType;
use crate::extractors::blocks::BlockMatcher;
use crate::extractors::rules::{compile, FieldRules, Matcher, Normalize, Rule};
use crate::extractors::version::{ExtractorVersionId, SemVer};
use crate::extractors::RuleBookExtractor;

pub const CLASS: &str = "house_ptr";

const DATE: &str = r"\b(\d{1,2}/\d{1,2}/\d{4})\b";
const AMOUNT: &str = r"(\$[\d,]+\s*-\s*\$[\d,]+|(?i:over)\s*\$[\d,]+)";

fn header_rules() -> Vec<FieldRules> {
    vec![
        FieldRules::new(
            "filer_name",
            vec![
                Rule::labeled("ptr.filer_name.labeled", r"(?m)^\s*Name:\s*(.+?)\s*$", Normalize::Name),
                Rule::inferred(
                    "ptr.filer_name.signature",
                    Matcher::First(compile(r"(?m)^\s*Digitally Signed:\s*(.+?)\s*,")),
                    Normalize::Name,
                ),
            ],
        ),
        FieldRules::new(
            "filer_status",
            vec![Rule::labeled("ptr.filer_status.labeled", r"(?m)^\s*Status:\s*(.+?)\s*$", Normalize::Trim)],
        ),
        FieldRules::new(
            "state_district",
            vec![Rule::labeled(
                "ptr.state_district.labeled",
                r"(?m)^\s*State/District:\s*([A-Za-z]{2}\s*-?\s*\d{1,2})\b",
                Normalize::District,
            )],
        ),
        FieldRules::new(
            "filing_id",
            vec![Rule::labeled("ptr.filing_id.labeled", r"Filing ID\s*#\s*(\d+)", Normalize::Trim)],
        ),
        FieldRules::new(
            "filing_date",
            vec![Rule::inferred(
                "ptr.filing_date.signature",
                Matcher::First(compile(r"(?m)^\s*Digitally Signed:.*,\s*(\d{1,2}/\d{1,2}/\d{4})")),
                Normalize::Date,
            )],
        ),
    ]
}

/// Positional rules for one transaction row.
fn positional_row_rules() -> Vec<(&'static str, Vec<Rule>)> {
    vec![
        (
            "owner",
            vec![
                Rule::inferred("ptr.owner.row_prefix", Matcher::First(compile(r"\A(SP|DC|JT)\s")), Normalize::Upper),
                Rule::fallback("ptr.owner.default_self", "SELF"),
            ],
        ),
        (
            "asset_name",
            vec![Rule::inferred(
                "ptr.asset_name.row",
                Matcher::First(compile(r"\A(?:(?:SP|DC|JT)\s+)?(.+?)\s*\[[A-Z]{2}\]")),
                Normalize::Trim,
            )],
        ),
        (
            "ticker",
            vec![Rule::inferred(
                "ptr.ticker.parenthesized",
                Matcher::First(compile(r"\(([A-Z][A-Z0-9.]{0,5})\)\s*\[[A-Z]{2}\]")),
                Normalize::Upper,
            )],
        ),
        (
            "asset_type",
            vec![Rule::inferred("ptr.asset_type.code", Matcher::First(compile(r"\[([A-Z]{2})\]")), Normalize::Upper)],
        ),
        (
            "transaction_type",
            vec![Rule::inferred(
                "ptr.transaction_type.row",
                Matcher::First(compile(r"\[[A-Z]{2}\]\s+(P|S \(partial\)|S|E)\s")),
                Normalize::Trim,
            )],
        ),
        (
            "transaction_date",
            vec![Rule::inferred("ptr.transaction_date.first_date", Matcher::Nth(compile(DATE), 0), Normalize::Date)],
        ),
        (
            "notification_date",
            vec![Rule::inferred(
                "ptr.notification_date.second_date",
                Matcher::Nth(compile(DATE), 1),
                Normalize::Date,
            )],
        ),
        (
            "amount",
            vec![Rule::inferred("ptr.amount.range", Matcher::First(compile(AMOUNT)), Normalize::Amount)],
        ),
    ]
}

/// Labeled continuation-line rules added in 1.1.0, keyed by the field they take precedence for.
fn labeled_row_rules() -> Vec<(&'static str, Rule)> {
    vec![
        (
            "ticker",
            Rule::labeled("ptr.ticker.labeled", r"(?m)^\s*Ticker:\s*([A-Za-z][A-Za-z0-9.]{0,5})\s*$", Normalize::Upper),
        ),
        (
            "amount",
            Rule::labeled("ptr.amount.labeled", r"(?m)^\s*Amount:\s*(.+?)\s*$", Normalize::Amount),
        ),
        (
            "description",
            Rule::labeled("ptr.description.labeled", r"(?m)^\s*D:\s*(.+?)\s*$", Normalize::Trim),
        ),
        (
            "filing_status",
            Rule::labeled("ptr.filing_status.labeled", r"(?m)^\s*F\s*S:\s*(.+?)\s*$", Normalize::Trim),
        ),
    ]
}

fn transaction_matcher(fields: Vec<FieldRules>, merge_wrapped_prefix: bool) -> BlockMatcher {
    BlockMatcher {
        kind: "transaction",
        table_start: compile(r"(?i)^ID\s+Owner\s+Asset\b"),
        table_end: compile(r"(?i)^(?:\*\s*For the complete list|Initial Public Offerings|Certification and Signature)"),
        anchor: compile(r"\[[A-Z]{2}\]"),
        merge_wrapped_prefix,
        fields,
    }
}

fn ptr_extractor(version: SemVer, header: Vec<FieldRules>, blocks: BlockMatcher) -> RuleBookExtractor {
    RuleBookExtractor {
        id: ExtractorVersionId::new(RecordType::PeriodicTransactionReport, CLASS, version),
        header,
        blocks: Some(blocks),
    }
}

/// `house_ptr@1.0.0`: positional row rules only.
pub fn house_ptr_v1_0() -> RuleBookExtractor {
    let rows = positional_row_rules()
        .into_iter()
        .map(|(field, rules)| FieldRules::new(field, rules))
        .collect();
    ptr_extractor(SemVer::new(1, 0, 0), header_rules(), transaction_matcher(rows, false))
}

/// `house_ptr@1.1.0`: labeled row rules ahead of the positional ones, wrapped asset names.
pub fn house_ptr_v1_1() -> RuleBookExtractor {
    let mut labeled = labeled_row_rules();
    let mut rows: Vec<FieldRules> = positional_row_rules()
        .into_iter()
        .map(|(field, positional)| {
            let mut rules: Vec<Rule> = Vec::new();
            labeled.retain(|(name, rule)| {
                if *name == field {
                    rules.push(rule.clone());
                    false
                } else {
                    true
                }
            });
            rules.extend(positional);
            FieldRules::new(field, rules)
        })
        .collect();
    // Labeled-only fields.
    rows.extend(labeled.into_iter().map(|(field, rule)| FieldRules::new(field, vec![rule])));
    ptr_extractor(SemVer::new(1, 1, 0), header_rules(), transaction_matcher(rows, true))
}
