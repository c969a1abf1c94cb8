//! Chunk store, markdown output and completion markers.
//!
//! Each processed file produces, under `rag_staging/`:
//!
//! ```text
//! jsonl/<stem>-<hash8>.jsonl      one ChunkRecord per line
//! jsonl/<stem>-<hash8>_SUCCESS    CompletionMarker (JSON), written last
//! markdown/<stem>-<hash8>.md      full extracted text
//! ```
//!
//! The hash suffix keeps files with the same name from different folders
//! apart. The marker is only written after the JSONL file is complete, so
//! its presence means the output is whole.

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config::StoragePaths;
use crate::error::ProcessError;
use crate::models::{ChunkRecord, CompletionMarker};

pub const MARKER_SUFFIX: &str = "_SUCCESS";
const STEM_HASH_CHARS: usize = 8;

/// Write via a sibling temp file and rename, so readers never see a
/// partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// Output file stem for a source file: its own stem plus a hash prefix.
pub fn output_stem(source: &Path, hash: &str) -> String {
    let stem: String = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}", stem, &hash[..hash.len().min(STEM_HASH_CHARS)])
}

/// Marker path for a chunk-store file: `<stem>_SUCCESS` beside it.
pub fn marker_path(jsonl: &Path) -> PathBuf {
    let stem = jsonl
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    jsonl.with_file_name(format!("{}{}", stem, MARKER_SUFFIX))
}

#[derive(Debug, Clone)]
pub struct ChunkStore {
    jsonl_dir: PathBuf,
    markdown_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(paths: &StoragePaths) -> Self {
        Self {
            jsonl_dir: paths.jsonl.clone(),
            markdown_dir: paths.markdown.clone(),
        }
    }

    pub fn jsonl_dir(&self) -> &Path {
        &self.jsonl_dir
    }

    pub fn jsonl_path(&self, stem: &str) -> PathBuf {
        self.jsonl_dir.join(format!("{}.jsonl", stem))
    }

    pub fn write_records(&self, stem: &str, records: &[ChunkRecord]) -> Result<PathBuf, ProcessError> {
        fs::create_dir_all(&self.jsonl_dir)?;
        let mut out = Vec::new();
        for record in records {
            serde_json::to_writer(&mut out, record)?;
            out.push(b'\n');
        }
        let path = self.jsonl_path(stem);
        write_atomic(&path, &out).map_err(|e| ProcessError::from(e).context("writing chunk store"))?;
        Ok(path)
    }

    pub fn write_markdown(&self, stem: &str, markdown: &str) -> Result<PathBuf, ProcessError> {
        fs::create_dir_all(&self.markdown_dir)?;
        let path = self.markdown_dir.join(format!("{}.md", stem));
        write_atomic(&path, markdown.as_bytes())?;
        Ok(path)
    }

    pub fn write_marker(&self, jsonl: &Path, marker: &CompletionMarker) -> Result<PathBuf, ProcessError> {
        let path = marker_path(jsonl);
        let body = serde_json::to_vec_pretty(marker)?;
        write_atomic(&path, &body).map_err(|e| ProcessError::from(e).context("writing completion marker"))?;
        Ok(path)
    }
}

pub fn read_records(path: &Path) -> Result<Vec<ChunkRecord>> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid chunk record", path.display(), n + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn read_marker(path: &Path) -> Result<CompletionMarker> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid completion marker: {}", path.display()))
}

/// Every marker file in `dir`, sorted by name. A missing directory has none.
pub fn list_markers(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut markers = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let is_marker = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(MARKER_SUFFIX));
        if is_marker && path.is_file() {
            markers.push(path);
        }
    }
    markers.sort();
    Ok(markers)
}
