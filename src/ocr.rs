//! OCR collaborator interface and its HTTP client.
//!
//! The OCR engine itself is an external service. [`HttpOcrEngine`] posts a
//! batch of files (base64-encoded) to `ocr.endpoint` and expects per-file,
//! per-page text back:
//!
//! ```text
//! POST {endpoint}
//! {"model": "...", "documents": [{"name": "a.pdf", "mime_type": "application/pdf", "content_base64": "..."}]}
//!
//! 200 OK
//! {"documents": [{"name": "a.pdf", "pages": [{"page": 1, "text": "..."}]}]}
//! ```

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::OcrConfig;
use crate::error::{class_from_status, ProcessError};
use crate::filetype::mime_type;

/// Recognised text of one source, page by page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pages: Vec<OcrPage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OcrPage {
    pub page: u32,
    #[serde(default)]
    pub text: String,
}

impl OcrDocument {
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Batch OCR over page-image sources. Returns one document per input path,
/// in input order.
pub trait OcrEngine: Send {
    fn recognize(&self, paths: &[PathBuf]) -> Result<Vec<OcrDocument>, ProcessError>;
}

#[derive(Serialize)]
struct OcrRequestDoc {
    name: String,
    mime_type: &'static str,
    content_base64: String,
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    documents: Vec<OcrRequestDoc>,
}

#[derive(Deserialize)]
struct OcrResponse {
    documents: Vec<OcrDocument>,
}

pub struct HttpOcrEngine {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: Option<String>,
    batch_size: usize,
}

impl HttpOcrEngine {
    pub fn new(config: &OcrConfig) -> Result<Self, ProcessError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            ProcessError::permanent("OCR required but ocr.endpoint is not configured (unsupported)")
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
        })
    }

    fn encode(path: &Path) -> Result<OcrRequestDoc, ProcessError> {
        let bytes = std::fs::read(path)?;
        Ok(OcrRequestDoc {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime_type: mime_type(path),
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    fn send(&self, paths: &[PathBuf]) -> Result<Vec<OcrDocument>, ProcessError> {
        let documents = paths
            .iter()
            .map(|p| Self::encode(p))
            .collect::<Result<Vec<_>, _>>()?;
        let body = OcrRequest {
            model: self.model.as_deref(),
            documents,
        };
        let response = self.client.post(&self.endpoint).json(&body).send()?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(ProcessError::new(
                class_from_status(status.as_u16()),
                format!("OCR service error {}: {}", status, text),
            ));
        }
        let parsed: OcrResponse = response.json()?;
        if parsed.documents.len() != paths.len() {
            return Err(ProcessError::unclassified(format!(
                "OCR service returned {} documents for {} inputs",
                parsed.documents.len(),
                paths.len()
            )));
        }
        Ok(parsed.documents)
    }
}

impl OcrEngine for HttpOcrEngine {
    fn recognize(&self, paths: &[PathBuf]) -> Result<Vec<OcrDocument>, ProcessError> {
        let mut out = Vec::with_capacity(paths.len());
        for batch in paths.chunks(self.batch_size) {
            out.extend(self.send(batch)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_full_text_skips_blank_pages() {
        let doc = OcrDocument {
            name: "a.pdf".into(),
            pages: vec![
                OcrPage { page: 1, text: " Page one. ".into() },
                OcrPage { page: 2, text: "   ".into() },
                OcrPage { page: 3, text: "Page three.".into() },
            ],
        };
        assert_eq!(doc.full_text(), "Page one.\n\nPage three.");
    }

    #[test]
    fn test_missing_endpoint_is_permanent() {
        let err = HttpOcrEngine::new(&OcrConfig::default()).err().unwrap();
        assert_eq!(err.class, ErrorClass::Permanent);
    }

    #[test]
    fn test_response_shape_parses() {
        let json = r#"{"documents":[{"name":"s.png","pages":[{"page":1,"text":"hello"}]}]}"#;
        let parsed: OcrResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.documents[0].pages[0].text, "hello");
    }
}
