// src/extractors/rules.rs
//! Typed field rules. Each field owns an ordered list of rules; the first rule
//! that yields a non-empty value wins. Labeled rules are declared before
//! positional ones, which come before fallback constants.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extractors::FieldValue;

/// Lowest non-zero confidence; given to values that fail validation.
pub const MIN_CONFIDENCE: f64 = 0.05;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile WHITESPACE_RE"));

static AMOUNT_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\s*([\d,]+)\s*-\s*\$?\s*([\d,]+)$").expect("Failed to compile AMOUNT_RANGE_RE")
});

static AMOUNT_OVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^over\s*\$\s*([\d,]+)$").expect("Failed to compile AMOUNT_OVER_RE")
});

static DISTRICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]{2})\s*-?\s*(\d{1,2})$").expect("Failed to compile DISTRICT_RE")
});

static HONORIFIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:the\s+)?(?:hon\.?|honorable)\s+").expect("Failed to compile HONORIFIC_RE")
});

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d", "%m-%d-%Y", "%B %d, %Y"];

/// How a rule located its value. Determines the confidence it assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// The value sits next to its own label ("Name: ...").
    Labeled,
    /// The value was found by position or shape.
    Inferred,
    /// No match; a documented default was used.
    Fallback,
}

impl RuleKind {
    pub fn confidence(self) -> f64 {
        match self {
            RuleKind::Labeled => 0.95,
            RuleKind::Inferred => 0.70,
            RuleKind::Fallback => 0.30,
        }
    }
}

/// Where a rule looks. Patterns capture the value in group 1 (or the whole match
/// when there is no group).
#[derive(Debug, Clone)]
pub enum Matcher {
    /// First match.
    First(Regex),
    /// The n-th match, zero-based.
    Nth(Regex, usize),
    /// The last match.
    Last(Regex),
    /// The first non-empty line after a line matching the pattern.
    LineAfter(Regex),
    /// Always yields the constant.
    Constant(&'static str),
}

impl Matcher {
    fn find(&self, text: &str) -> Option<String> {
        match self {
            Matcher::First(re) => re.captures(text).map(|caps| capture_value(&caps)),
            Matcher::Nth(re, n) => re.captures_iter(text).nth(*n).map(|caps| capture_value(&caps)),
            Matcher::Last(re) => re.captures_iter(text).last().map(|caps| capture_value(&caps)),
            Matcher::LineAfter(re) => {
                let mut lines = text.lines();
                lines.by_ref().find(|line| re.is_match(line))?;
                lines
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
            }
            Matcher::Constant(value) => Some((*value).to_string()),
        }
    }

    /// Pattern source, for rule traces.
    pub fn pattern(&self) -> Option<&str> {
        match self {
            Matcher::First(re) | Matcher::Nth(re, _) | Matcher::Last(re) | Matcher::LineAfter(re) => {
                Some(re.as_str())
            }
            Matcher::Constant(_) => None,
        }
    }
}

fn capture_value(caps: &regex::Captures<'_>) -> String {
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Canonical form applied to a matched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalize {
    /// Trim and collapse internal whitespace.
    Trim,
    /// `YYYY-MM-DD`; unparseable dates are kept as found.
    Date,
    /// `$low - $high` or `Over $n`.
    Amount,
    Upper,
    /// Drops a leading honorific.
    Name,
    /// Two-letter state plus two-digit district, e.g. `CA05`.
    District,
}

impl Normalize {
    pub fn apply(self, raw: &str) -> String {
        let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ").into_owned();
        match self {
            Normalize::Trim => collapsed,
            Normalize::Upper => collapsed.to_uppercase(),
            Normalize::Name => HONORIFIC_RE.replace(&collapsed, "").trim().to_string(),
            Normalize::Date => normalize_date(&collapsed).unwrap_or(collapsed),
            Normalize::Amount => normalize_amount(&collapsed).unwrap_or(collapsed),
            Normalize::District => match DISTRICT_RE.captures(&collapsed) {
                Some(caps) => format!(
                    "{}{:0>2}",
                    caps[1].to_ascii_uppercase(),
                    caps[2].parse::<u32>().unwrap_or(0)
                ),
                None => collapsed.to_uppercase(),
            },
        }
    }
}

fn normalize_date(value: &str) -> Option<String> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn normalize_amount(value: &str) -> Option<String> {
    if let Some(caps) = AMOUNT_RANGE_RE.captures(value) {
        return Some(format!("${} - ${}", &caps[1], &caps[2]));
    }
    AMOUNT_OVER_RE
        .captures(value)
        .map(|caps| format!("Over ${}", &caps[1]))
}

/// One rule for one field.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Stable identifier recorded on every value this rule produces.
    pub id: &'static str,
    pub kind: RuleKind,
    pub matcher: Matcher,
    pub normalize: Normalize,
}

impl Rule {
    pub fn labeled(id: &'static str, pattern: &str, normalize: Normalize) -> Self {
        Self {
            id,
            kind: RuleKind::Labeled,
            matcher: Matcher::First(compile(pattern)),
            normalize,
        }
    }

    pub fn inferred(id: &'static str, matcher: Matcher, normalize: Normalize) -> Self {
        Self {
            id,
            kind: RuleKind::Inferred,
            matcher,
            normalize,
        }
    }

    pub fn fallback(id: &'static str, value: &'static str) -> Self {
        Self {
            id,
            kind: RuleKind::Fallback,
            matcher: Matcher::Constant(value),
            normalize: Normalize::Trim,
        }
    }
}

/// Compiles a built-in rule pattern. Only called while building static rule books.
pub fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("built-in rule pattern '{}' is invalid: {}", pattern, e))
}

/// The ordered rule list for one field.
#[derive(Debug, Clone)]
pub struct FieldRules {
    pub field: &'static str,
    pub rules: Vec<Rule>,
}

impl FieldRules {
    pub fn new(field: &'static str, rules: Vec<Rule>) -> Self {
        Self { field, rules }
    }

    /// Tries the rules in declared order; the first non-empty value wins.
    pub fn apply(&self, text: &str) -> Option<FieldValue> {
        for rule in &self.rules {
            let Some(raw) = rule.matcher.find(text) else {
                continue;
            };
            let value = rule.normalize.apply(&raw);
            if value.is_empty() {
                continue;
            }
            tracing::trace!("Rule {} matched field {}: '{}'", rule.id, self.field, value);
            return Some(FieldValue {
                field_name: self.field.to_string(),
                value,
                confidence: rule.kind.confidence(),
                extraction_rule_id: rule.id.to_string(),
                rule_kind: rule.kind,
                validation_error: None,
            });
        }
        None
    }
}
