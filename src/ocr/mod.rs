// src/ocr/mod.rs
pub mod client;

use serde::{Deserialize, Serialize};

use crate::utils::error::OcrError;

pub use client::HttpOcrEngine;

/// Text recognized by the OCR service for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    /// Service-reported recognition confidence, informational only.
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub pages: u32,
}

/// External OCR capability. Called from blocking worker threads.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, document: &[u8]) -> Result<OcrOutput, OcrError>;
}

/// Used when no OCR endpoint is configured: every OCR attempt fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _document: &[u8]) -> Result<OcrOutput, OcrError> {
        Err(OcrError::Unavailable)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns fixed text for every document.
    pub(crate) struct FixedOcr(pub String);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _document: &[u8]) -> Result<OcrOutput, OcrError> {
            if self.0.trim().is_empty() {
                return Err(OcrError::EmptyText);
            }
            Ok(OcrOutput {
                text: self.0.clone(),
                confidence: 0.9,
                pages: 1,
            })
        }
    }

    #[test]
    fn disabled_engine_is_unavailable() {
        assert!(matches!(DisabledOcr.recognize(b"x"), Err(OcrError::Unavailable)));
    }

    #[test]
    fn output_tolerates_missing_optional_fields() {
        let output: OcrOutput = serde_json::from_str(r#"{"text":"Name: A"}"#).unwrap();
        assert_eq!(output.pages, 0);
        assert_eq!(output.text, "Name: A");
    }
}
