// src/extractors/schema.rs
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::documents::RecordType;
use crate::utils::error::SchemaValidationError;

static DISTRICT_FORMAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]{2}\d{2}$").expect("Failed to compile DISTRICT_FORMAT_RE")
});

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,12}$").expect("Failed to compile DIGITS_RE"));

static ASSET_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}$").expect("Failed to compile ASSET_CODE_RE"));

static TICKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9.]{0,5}$").expect("Failed to compile TICKER_RE"));

/// Years a disclosure can plausibly refer to.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1990..=2100;

/// Declared format or range of a field value.
#[derive(Debug, Clone)]
pub enum FieldFormat {
    Text { max_len: usize },
    /// `YYYY-MM-DD` within the plausible year range.
    Date,
    Year,
    /// `$low - $high` with low <= high, `Over $n`, or `None`.
    AmountRange,
    Integer { min: i64, max: i64 },
    OneOf(&'static [&'static str]),
    Pattern(&'static Lazy<Regex>),
}

impl FieldFormat {
    fn check(&self, value: &str) -> Result<(), String> {
        match self {
            FieldFormat::Text { max_len } => {
                if value.chars().count() > *max_len {
                    return Err(format!("longer than {} characters", max_len));
                }
                Ok(())
            }
            FieldFormat::Date => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map_err(|_| "not a calendar date".to_string())?;
                check_year(date.year())
            }
            FieldFormat::Year => {
                let year = value
                    .parse::<i32>()
                    .map_err(|_| "not a four-digit year".to_string())?;
                check_year(year)
            }
            FieldFormat::AmountRange => check_amount(value),
            FieldFormat::Integer { min, max } => {
                let n = value
                    .parse::<i64>()
                    .map_err(|_| "not an integer".to_string())?;
                if n < *min || n > *max {
                    return Err(format!("outside {}..={}", min, max));
                }
                Ok(())
            }
            FieldFormat::OneOf(allowed) => {
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
                    Ok(())
                } else {
                    Err(format!("not one of {:?}", allowed))
                }
            }
            FieldFormat::Pattern(re) => {
                if re.is_match(value) {
                    Ok(())
                } else {
                    Err(format!("does not match {}", re.as_str()))
                }
            }
        }
    }
}

fn check_year(year: i32) -> Result<(), String> {
    if YEAR_RANGE.contains(&year) {
        Ok(())
    } else {
        Err(format!("year {} outside {}..={}", year, YEAR_RANGE.start(), YEAR_RANGE.end()))
    }
}

fn parse_dollars(raw: &str) -> Option<u64> {
    raw.replace(',', "").parse().ok()
}

fn check_amount(value: &str) -> Result<(), String> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(());
    }
    if let Some(rest) = value.strip_prefix("Over $") {
        return parse_dollars(rest)
            .map(|_| ())
            .ok_or_else(|| "malformed open-ended amount".to_string());
    }
    let (low, high) = value
        .split_once(" - ")
        .ok_or_else(|| "not an amount range".to_string())?;
    let low = low.strip_prefix('$').and_then(parse_dollars);
    let high = high.strip_prefix('$').and_then(parse_dollars);
    match (low, high) {
        (Some(low), Some(high)) if low <= high => Ok(()),
        (Some(_), Some(_)) => Err("lower bound exceeds upper bound".to_string()),
        _ => Err("malformed amount range".to_string()),
    }
}

/// One field the record type expects.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    /// Weight in the aggregate confidence.
    pub importance: f64,
    pub format: FieldFormat,
}

impl FieldSpec {
    fn required(name: &'static str, importance: f64, format: FieldFormat) -> Self {
        Self { name, required: true, importance, format }
    }

    fn optional(name: &'static str, importance: f64, format: FieldFormat) -> Self {
        Self { name, required: false, importance, format }
    }

    pub fn validate(&self, value: &str) -> Result<(), SchemaValidationError> {
        self.format.check(value).map_err(|reason| SchemaValidationError {
            field: self.name.to_string(),
            value: value.to_string(),
            reason,
        })
    }
}

/// Fields of one repeated sub-record (a transaction line, an asset holding).
#[derive(Debug, Clone)]
pub struct SubRecordSchema {
    pub kind: &'static str,
    pub fields: Vec<FieldSpec>,
    /// Documents of this type normally carry at least one sub-record.
    pub usually_present: bool,
}

impl SubRecordSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|f| f.required).count()
    }
}

/// Expected fields of one record type.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub record_type: RecordType,
    pub fields: Vec<FieldSpec>,
    pub sub_record: Option<SubRecordSchema>,
    /// Completeness below this raises a suspicious flag and makes an attempt partial.
    pub completeness_floor: f64,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|f| f.required).count()
    }
}

const FILER_STATUSES: &[&str] = &["Member", "Officer or Employee", "Candidate"];
const PTR_TRANSACTION_TYPES: &[&str] = &["P", "S", "S (partial)", "E"];
const OWNER_CODES: &[&str] = &["SELF", "SP", "DC", "JT"];

static PTR_SCHEMA: Lazy<RecordSchema> = Lazy::new(|| RecordSchema {
    record_type: RecordType::PeriodicTransactionReport,
    fields: vec![
        FieldSpec::required("filer_name", 3.0, FieldFormat::Text { max_len: 120 }),
        FieldSpec::required("state_district", 1.0, FieldFormat::Pattern(&DISTRICT_FORMAT_RE)),
        FieldSpec::required("filing_date", 2.0, FieldFormat::Date),
        FieldSpec::optional("filer_status", 0.5, FieldFormat::OneOf(FILER_STATUSES)),
        FieldSpec::optional("filing_id", 0.5, FieldFormat::Pattern(&DIGITS_RE)),
    ],
    sub_record: Some(SubRecordSchema {
        kind: "transaction",
        fields: vec![
            FieldSpec::required("asset_name", 2.0, FieldFormat::Text { max_len: 200 }),
            FieldSpec::required("transaction_type", 2.0, FieldFormat::OneOf(PTR_TRANSACTION_TYPES)),
            FieldSpec::required("transaction_date", 2.0, FieldFormat::Date),
            FieldSpec::required("amount", 2.0, FieldFormat::AmountRange),
            FieldSpec::optional("owner", 0.5, FieldFormat::OneOf(OWNER_CODES)),
            FieldSpec::optional("ticker", 1.0, FieldFormat::Pattern(&TICKER_RE)),
            FieldSpec::optional("asset_type", 0.5, FieldFormat::Pattern(&ASSET_CODE_RE)),
            FieldSpec::optional("notification_date", 0.5, FieldFormat::Date),
            FieldSpec::optional("filing_status", 0.25, FieldFormat::Text { max_len: 40 }),
            FieldSpec::optional("description", 0.25, FieldFormat::Text { max_len: 500 }),
        ],
        usually_present: true,
    }),
    completeness_floor: 0.8,
});

static ANNUAL_SCHEMA: Lazy<RecordSchema> = Lazy::new(|| RecordSchema {
    record_type: RecordType::AnnualReport,
    fields: vec![
        FieldSpec::required("filer_name", 3.0, FieldFormat::Text { max_len: 120 }),
        FieldSpec::required("filing_year", 2.0, FieldFormat::Year),
        FieldSpec::required("filing_date", 1.0, FieldFormat::Date),
        FieldSpec::optional("state_district", 1.0, FieldFormat::Pattern(&DISTRICT_FORMAT_RE)),
        FieldSpec::optional("filer_status", 0.5, FieldFormat::OneOf(FILER_STATUSES)),
        FieldSpec::optional("filing_type", 0.5, FieldFormat::Text { max_len: 60 }),
        FieldSpec::optional("filing_id", 0.5, FieldFormat::Pattern(&DIGITS_RE)),
    ],
    sub_record: Some(SubRecordSchema {
        kind: "holding",
        fields: vec![
            FieldSpec::required("asset_name", 2.0, FieldFormat::Text { max_len: 200 }),
            FieldSpec::required("value", 2.0, FieldFormat::AmountRange),
            FieldSpec::optional("owner", 0.5, FieldFormat::OneOf(OWNER_CODES)),
            FieldSpec::optional("asset_type", 0.5, FieldFormat::Pattern(&ASSET_CODE_RE)),
            FieldSpec::optional("income_type", 1.0, FieldFormat::Text { max_len: 60 }),
            FieldSpec::optional("income_amount", 1.0, FieldFormat::AmountRange),
            FieldSpec::optional("location", 0.25, FieldFormat::Text { max_len: 120 }),
            FieldSpec::optional("description", 0.25, FieldFormat::Text { max_len: 500 }),
        ],
        usually_present: true,
    }),
    completeness_floor: 0.75,
});

static EXTENSION_SCHEMA: Lazy<RecordSchema> = Lazy::new(|| RecordSchema {
    record_type: RecordType::ExtensionRequest,
    fields: vec![
        FieldSpec::required("filer_name", 3.0, FieldFormat::Text { max_len: 120 }),
        FieldSpec::required("report_type", 1.0, FieldFormat::Text { max_len: 60 }),
        FieldSpec::required("due_date", 2.0, FieldFormat::Date),
        FieldSpec::required("days_requested", 1.0, FieldFormat::Integer { min: 1, max: 90 }),
        FieldSpec::optional("state_district", 0.5, FieldFormat::Pattern(&DISTRICT_FORMAT_RE)),
        FieldSpec::optional("filing_year", 0.5, FieldFormat::Year),
        FieldSpec::optional("request_date", 0.5, FieldFormat::Date),
    ],
    sub_record: None,
    completeness_floor: 0.75,
});

/// The fixed field schema for a record type.
pub fn schema_for(record_type: RecordType) -> &'static RecordSchema {
    match record_type {
        RecordType::PeriodicTransactionReport => &PTR_SCHEMA,
        RecordType::AnnualReport => &ANNUAL_SCHEMA,
        RecordType::ExtensionRequest => &EXTENSION_SCHEMA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_record_type_has_required_fields() {
        for record_type in RecordType::ALL {
            let schema = schema_for(record_type);
            assert_eq!(schema.record_type, record_type);
            assert!(schema.required_count() > 0);
            assert!(schema.fields.iter().all(|f| f.importance > 0.0));
        }
    }

    #[test]
    fn amount_ranges() {
        assert!(check_amount("$1,001 - $15,000").is_ok());
        assert!(check_amount("Over $50,000,000").is_ok());
        assert!(check_amount("None").is_ok());
        assert!(check_amount("$15,000 - $1,001").is_err());
        assert!(check_amount("about $5").is_err());
    }

    #[test]
    fn field_validation_reports_the_reason() {
        let schema = schema_for(RecordType::PeriodicTransactionReport);
        let district = schema.field("state_district").unwrap();
        assert!(district.validate("CA05").is_ok());
        let err = district.validate("California").unwrap_err();
        assert_eq!(err.field, "state_district");

        let date = schema.field("filing_date").unwrap();
        assert!(date.validate("2023-03-15").is_ok());
        assert!(date.validate("1850-01-01").is_err());
        assert!(date.validate("03/15/2023").is_err());

        let days = schema_for(RecordType::ExtensionRequest).field("days_requested").unwrap();
        assert!(days.validate("90").is_ok());
        assert!(days.validate("120").is_err());
    }
}
