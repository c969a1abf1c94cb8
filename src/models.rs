//! Core data models used throughout the intake pipeline.
//!
//! These are the records that flow between stages: classification results,
//! inventory rows, chunk records, manifest and quarantine rows, and the
//! completion markers that make reruns idempotent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Routing verdict for a paged document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocClass {
    Digital,
    Scanned,
    Rejected,
}

impl DocClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DocClass::Digital => "digital",
            DocClass::Scanned => "scanned",
            DocClass::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for DocClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "digital" => Ok(DocClass::Digital),
            "scanned" => Ok(DocClass::Scanned),
            "rejected" => Ok(DocClass::Rejected),
            other => Err(format!("unknown classification type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Outcome of the full-page-image sampling pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSampling {
    pub has_full_page_scans: bool,
    pub sampled_pages: usize,
    pub scan_pages: usize,
    pub scan_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub doc_class: DocClass,
    pub percent_digital: f64,
    pub confidence: Confidence,
    pub total_pages: usize,
    pub digital_pages: usize,
    pub allowed: bool,
    pub reason: String,
    pub image_detection: Option<ImageSampling>,
}

/// One discovered file. Written once per inventory build.
///
/// Flat so it maps one-to-one onto the inventory CSV columns. Classification
/// fields are empty for file types that are not paged documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_type: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub hash_sha256: String,
    pub detected_at: String,
    pub total_pages: Option<usize>,
    pub digital_pages: Option<usize>,
    pub percent_digital: Option<f64>,
    pub classification_type: Option<DocClass>,
    pub classification_confidence: Option<Confidence>,
    pub allowed: bool,
    pub rejection_reason: Option<String>,
}

impl InventoryRecord {
    /// Rebuild the routing-relevant part of a classification from the row.
    pub fn classification(&self) -> Option<ClassificationResult> {
        let doc_class = self.classification_type?;
        Some(ClassificationResult {
            doc_class,
            percent_digital: self.percent_digital.unwrap_or(0.0),
            confidence: self.classification_confidence.unwrap_or(Confidence::Low),
            total_pages: self.total_pages.unwrap_or(0),
            digital_pages: self.digital_pages.unwrap_or(0),
            allowed: self.allowed,
            reason: self.rejection_reason.clone().unwrap_or_default(),
            image_detection: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableBoundary {
    Start,
    BlankRow,
    SchemaChange,
    Header,
    RowCap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkAttrs {
    /// Whitespace-split word count, not a subword tokenizer count.
    pub token_count: usize,
    pub table: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// `[x0, y0, x1, y1]` in page points, when the extractor reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    /// Half-open `[start, end)` zero-based row range within the sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_span: Option<(usize, usize)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_cols: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_header: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<TableBoundary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub schema_version: String,
    /// Routing label, e.g. `pdf_digital`, `pdf_scanned`, `docx`, `xlsx`.
    pub file_type: String,
    pub hash_input_sha256: String,
    pub processor: String,
    pub processed_at: String,
    pub batch_id: String,
    pub confidence_score: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// One retrieval unit, one JSON line in the chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub attrs: ChunkAttrs,
    pub source: SourceInfo,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
}

pub fn chunk_id(doc_id: &str, index: usize) -> String {
    format!("{}_{:04}", doc_id, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Quarantined,
}

/// One manifest line per file per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub doc_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub processor: String,
    pub status: OutcomeStatus,
    pub page_count: Option<usize>,
    pub chunks_created: usize,
    pub processing_duration_ms: u64,
    pub char_count: usize,
    pub estimated_tokens: usize,
    pub hash_sha256: String,
    pub batch_id: String,
    pub processed_at: String,
    /// `; `-joined so the row stays one CSV record.
    pub warnings: String,
    pub error: String,
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRow {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub attempted_processor: String,
    pub error_message: String,
    pub error_class: String,
    pub retry_count: u32,
    pub quarantined_at: String,
    pub quarantine_location: String,
}

/// Written next to a chunk-store file once it is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub timestamp: String,
    pub file_path: String,
    pub file_hash: String,
    pub chunks: usize,
    pub processor: String,
    pub processing_duration_ms: u64,
    pub config_version: String,
}

/// Result of driving one file through the retry loop.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub manifest: ManifestRow,
    pub quarantine: Option<QuarantineRow>,
    pub retry_count: u32,
}

impl OutcomeRecord {
    pub fn status(&self) -> OutcomeStatus {
        self.manifest.status
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub chunks_created: usize,
    pub processing_ms: u64,
    pub manifest_path: Option<PathBuf>,
    pub quarantine_csv_path: Option<PathBuf>,
}
