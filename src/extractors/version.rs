// src/extractors/version.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::documents::RecordType;

/// `major.minor.patch`, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('v');
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("'{}' is not a major.minor.patch version", s));
        }
        let number = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("'{}' is not a valid version component in '{}'", part, s))
        };
        Ok(SemVer::new(number(parts[0])?, number(parts[1])?, number(parts[2])?))
    }
}

impl TryFrom<String> for SemVer {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SemVer> for String {
    fn from(value: SemVer) -> Self {
        value.to_string()
    }
}

/// Identity of one deployable extractor: (record type, class, version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtractorVersionId {
    pub record_type: RecordType,
    pub extractor_class: String,
    pub version: SemVer,
}

impl ExtractorVersionId {
    pub fn new(record_type: RecordType, extractor_class: impl Into<String>, version: SemVer) -> Self {
        Self {
            record_type,
            extractor_class: extractor_class.into(),
            version,
        }
    }

    /// Parses `class@major.minor.patch` for the given record type.
    pub fn parse(record_type: RecordType, version_ref: &str) -> Result<Self, String> {
        let (class, version) = split_version_ref(version_ref)?;
        Ok(Self::new(record_type, class, version))
    }

    /// `class@major.minor.patch`; also the directory name of this version's results.
    pub fn version_ref(&self) -> String {
        format!("{}@{}", self.extractor_class, self.version)
    }
}

impl fmt::Display for ExtractorVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.record_type, self.extractor_class, self.version)
    }
}

/// Splits `class@1.2.3` into its class and version.
pub fn split_version_ref(version_ref: &str) -> Result<(String, SemVer), String> {
    let (class, version) = version_ref
        .trim()
        .split_once('@')
        .ok_or_else(|| format!("'{}' is not of the form class@major.minor.patch", version_ref))?;
    if class.is_empty()
        || !class
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("'{}' is not a valid extractor class", class));
    }
    Ok((class.to_string(), version.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_numerically() {
        let a: SemVer = "1.2.10".parse().unwrap();
        let b: SemVer = "1.10.0".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.to_string(), "1.2.10");
        assert!("1.2".parse::<SemVer>().is_err());
        assert!("1.x.0".parse::<SemVer>().is_err());
    }

    #[test]
    fn version_ref_round_trips() {
        let id = ExtractorVersionId::parse(RecordType::PeriodicTransactionReport, "house_ptr@1.1.0").unwrap();
        assert_eq!(id.extractor_class, "house_ptr");
        assert_eq!(id.version, SemVer::new(1, 1, 0));
        assert_eq!(id.version_ref(), "house_ptr@1.1.0");
        assert_eq!(id.to_string(), "ptr/house_ptr@1.1.0");
        assert!(split_version_ref("house_ptr").is_err());
        assert!(split_version_ref("../x@1.0.0").is_err());
    }

    #[test]
    fn semver_serializes_as_string() {
        let json = serde_json::to_string(&SemVer::new(2, 0, 1)).unwrap();
        assert_eq!(json, "\"2.0.1\"");
        let parsed: SemVer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SemVer::new(2, 0, 1));
    }
}
