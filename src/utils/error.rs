// src/utils/error.rs
use thiserror::Error;

use crate::documents::RecordType;

// Define specific error types for different parts of the engine

/// The detector could not match any known template.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("Unrecognized template for document {doc_id}: {reason}")]
    UnrecognizedTemplate { doc_id: String, reason: String },
}

/// Failure to obtain text from a document's own text layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TextLayerError {
    #[error("Document has no extractable text layer")]
    NoTextLayer,

    #[error("Document is encrypted")]
    Encrypted,

    #[error("PDF parsing failed: {0}")]
    Pdf(String),
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("No OCR engine is configured")]
    Unavailable,

    #[error("OCR request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("OCR service returned HTTP {0}")]
    Http(reqwest::StatusCode),

    #[error("OCR service rate limit exceeded")]
    RateLimited,

    #[error("OCR service returned no text")]
    EmptyText,
}

/// One extraction method failed on one document. Recorded on the attempt, never fatal.
#[derive(Error, Debug)]
pub enum ExtractionAttemptFailure {
    #[error("Text layer unavailable: {0}")]
    TextLayer(#[from] TextLayerError),

    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),

    #[error("No field rule matched the document text")]
    NoFieldsMatched,
}

/// A field value violating its declared format or range.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Field '{field}' value '{value}' is invalid: {reason}")]
pub struct SchemaValidationError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog is malformed: {0}")]
    Catalog(String),

    #[error("Document not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Production lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("{path} holds the result of '{found}', not '{expected}'")]
    DocIdMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Concurrent promotion conflict on {record_type}/{extractor_class}: expected revision {expected}, found {found}")]
    ConcurrentPromotionConflict {
        record_type: RecordType,
        extractor_class: String,
        expected: u64,
        found: u64,
    },

    #[error("Registry pointer for {record_type}/{extractor_class} is locked by another writer")]
    PointerLocked {
        record_type: RecordType,
        extractor_class: String,
    },

    #[error("Concurrent update of {version}: expected revision {expected}, found {found}")]
    ConcurrentUpdateConflict {
        version: String,
        expected: u64,
        found: u64,
    },

    #[error("Registry record {0} is locked by another writer")]
    RecordLocked(String),

    #[error("Registry lock {path} was left behind by {holder}; remove it once no registry writer is running")]
    StaleLock { path: String, holder: String },

    #[error("Extractor version not deployed: {0}")]
    UnknownVersion(String),

    #[error("Extractor version already deployed: {0}")]
    AlreadyDeployed(String),

    #[error("Invalid transition for {version}: {reason}")]
    InvalidTransition { version: String, reason: String },

    #[error("Registry I/O error: {0}")]
    Io(String),

    #[error("Registry record is malformed: {0}")]
    Serialization(String),
}

impl RegistryError {
    /// Conflicts are the caller's to retry; everything else is a hard failure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RegistryError::ConcurrentPromotionConflict { .. }
                | RegistryError::PointerLocked { .. }
                | RegistryError::ConcurrentUpdateConflict { .. }
                | RegistryError::RecordLocked(_)
        )
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

/// Per-document pipeline failures. Always recovered by the caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error("All {attempts} extraction attempts failed for document {doc_id}")]
    AllAttemptsExhausted { doc_id: String, attempts: usize },

    #[error("Document {doc_id} is a {found} filing but extractor handles {expected}")]
    RecordTypeMismatch {
        doc_id: String,
        expected: RecordType,
        found: RecordType,
    },
}

/// Malformed reprocessing requests and the hard failures a run can surface.
#[derive(Error, Debug)]
pub enum ReprocessError {
    #[error("Invalid year range {start}..={end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown extractor version: {0}")]
    UnknownExtractorVersion(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Document selection failed: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR setup failed: {0}")]
    Ocr(#[from] OcrError),

    #[error("Document source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Reprocessing failed: {0}")]
    Reprocess(#[from] ReprocessError),

    #[error("Extraction failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Background task failed: {0}")]
    Task(String),
}
