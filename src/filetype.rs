//! File type detection, MIME mapping and content hashing.
//!
//! The content hash is the deduplication key for the whole pipeline: it is
//! stamped into inventory rows, chunk records, manifest rows and completion
//! markers. The document id is its first 16 hex characters.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Extensions (lowercase, with dot) the pipeline can process.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".xlsx", ".csv", ".jpg", ".jpeg", ".png", ".tif", ".tiff",
];

const HASH_READ_BUF: usize = 8192;
const DOC_ID_LEN: usize = 16;

/// Coarse file family used for handler routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
    Xlsx,
    Csv,
    Image,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<FileKind> {
        let ext = extension_of(path)?;
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            "xlsx" => Some(FileKind::Xlsx),
            "csv" => Some(FileKind::Csv),
            "jpg" | "jpeg" | "png" | "tif" | "tiff" => Some(FileKind::Image),
            _ => None,
        }
    }

    pub fn is_tabular(self) -> bool {
        matches!(self, FileKind::Xlsx | FileKind::Csv)
    }
}

/// Lowercase extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Type tag as written to inventory and manifest rows (`.pdf`, `.docx`, ...).
pub fn file_type_tag(path: &Path) -> String {
    extension_of(path)
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

pub fn is_supported(path: &Path) -> bool {
    FileKind::from_path(path).is_some()
}

pub fn mime_type(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("doc") => "application/msword",
        Some("xlsx") => MIME_XLSX,
        Some("xls") => "application/vnd.ms-excel",
        Some("csv") => MIME_CSV,
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("msg") => "application/vnd.ms-outlook",
        Some("eml") => "message/rfc822",
        _ => MIME_OCTET_STREAM,
    }
}

/// Streaming SHA-256 of a file's contents, lowercase hex.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_READ_BUF];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Document id: the hash prefix shared by every chunk of one file.
pub fn doc_id(hash: &str) -> &str {
    &hash[..hash.len().min(DOC_ID_LEN)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_kind_from_extension_is_case_insensitive() {
        assert_eq!(FileKind::from_path(Path::new("a/B.PDF")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("scan.TiF")), Some(FileKind::Image));
        assert_eq!(FileKind::from_path(Path::new("book.xlsx")), Some(FileKind::Xlsx));
        assert_eq!(FileKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(FileKind::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_mime_map() {
        assert_eq!(mime_type(&PathBuf::from("x.pdf")), MIME_PDF);
        assert_eq!(mime_type(&PathBuf::from("x.jpeg")), "image/jpeg");
        assert_eq!(mime_type(&PathBuf::from("x.eml")), "message/rfc822");
        assert_eq!(mime_type(&PathBuf::from("x.bin")), MIME_OCTET_STREAM);
    }

    #[test]
    fn test_type_tag() {
        assert_eq!(file_type_tag(Path::new("dir/Report.PDF")), ".pdf");
        assert_eq!(file_type_tag(Path::new("noext")), "");
    }

    #[test]
    fn test_file_hash_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        File::create(&path).unwrap().write_all(&data).unwrap();

        let streamed = compute_file_hash(&path).unwrap();
        assert_eq!(streamed, hash_bytes(&data));
        assert_eq!(streamed.len(), 64);
        assert_eq!(doc_id(&streamed), &streamed[..16]);
    }

    #[test]
    fn test_hash_of_empty_input() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
