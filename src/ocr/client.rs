// src/ocr/client.rs
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::header;

use crate::ocr::{OcrEngine, OcrOutput};
use crate::utils::error::OcrError;

const OCR_USER_AGENT: &str = concat!("disclosure-extractor/", env!("CARGO_PKG_VERSION"));

/// Client for an OCR service that accepts raw document bytes and answers with JSON.
///
/// The blocking client is built on first use so the engine can be constructed
/// inside the async runtime and used from `spawn_blocking` workers.
pub struct HttpOcrEngine {
    endpoint: String,
    timeout: Duration,
    client: OnceCell<reqwest::blocking::Client>,
}

impl HttpOcrEngine {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            client: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, OcrError> {
        self.client.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .user_agent(OCR_USER_AGENT)
                .timeout(self.timeout)
                .build()
                .map_err(OcrError::from)
        })
    }
}

impl OcrEngine for HttpOcrEngine {
    fn recognize(&self, document: &[u8]) -> Result<OcrOutput, OcrError> {
        let client = self.client()?;
        tracing::debug!("Sending {} bytes to OCR service at {}", document.len(), self.endpoint);

        let response = client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::ACCEPT, "application/json")
            .body(document.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("OCR service returned HTTP {}", status);
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(OcrError::RateLimited);
            }
            return Err(OcrError::Http(status));
        }

        let output: OcrOutput = response.json()?;
        if output.text.trim().is_empty() {
            return Err(OcrError::EmptyText);
        }
        tracing::debug!(
            "OCR returned {} chars over {} pages (confidence {:.2})",
            output.text.len(),
            output.pages,
            output.confidence
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_is_not_built_until_first_request() {
        let engine = HttpOcrEngine::new("http://127.0.0.1:9/ocr", Duration::from_millis(200));
        assert!(engine.client.get().is_none());
        assert_eq!(engine.endpoint(), "http://127.0.0.1:9/ocr");
    }

    #[test]
    fn unreachable_service_is_a_network_error() {
        // Port 9 (discard) is closed on test hosts; the request fails fast.
        let engine = HttpOcrEngine::new("http://127.0.0.1:9/ocr", Duration::from_millis(500));
        assert!(matches!(engine.recognize(b"%PDF-1.4"), Err(OcrError::Network(_))));
    }
}
