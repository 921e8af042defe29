// src/documents/models.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Disclosure form family. Each record type has its own field schema and extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "ptr")]
    PeriodicTransactionReport,
    #[serde(rename = "annual")]
    AnnualReport,
    #[serde(rename = "extension")]
    ExtensionRequest,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [
        RecordType::PeriodicTransactionReport,
        RecordType::AnnualReport,
        RecordType::ExtensionRequest,
    ];

    /// Short name used in storage paths and on the command line.
    pub const fn slug(self) -> &'static str {
        match self {
            RecordType::PeriodicTransactionReport => "ptr",
            RecordType::AnnualReport => "annual",
            RecordType::ExtensionRequest => "extension",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ptr" | "periodic_transaction_report" => Ok(RecordType::PeriodicTransactionReport),
            "annual" | "annual_report" => Ok(RecordType::AnnualReport),
            "extension" | "extension_request" => Ok(RecordType::ExtensionRequest),
            other => Err(format!("unknown record type '{}'", other)),
        }
    }
}

/// Minimal metadata delivered with the document bytes by the acquisition side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEnvelope {
    pub doc_id: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<RecordType>,
}

/// Container format sniffed from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Html,
    PlainText,
    Image,
}

/// How text is obtained for one extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptMethod {
    /// Read the document's own text layer (PDF text objects, HTML, plain text).
    DirectText,
    /// Send the document to the external OCR service.
    Ocr,
}

impl fmt::Display for AttemptMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptMethod::DirectText => f.write_str("direct_text"),
            AttemptMethod::Ocr => f.write_str("ocr"),
        }
    }
}

/// Physical properties of a document, captured once per run for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalProperties {
    pub format: DocumentFormat,
    pub page_count: u32,
    pub byte_size: u64,
    pub has_text_layer: bool,
    pub is_encrypted: bool,
    pub producer_tool: Option<String>,
}
