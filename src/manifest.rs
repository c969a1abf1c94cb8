//! Per-batch manifest and batch summary.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::{BatchSummary, ManifestRow, OutcomeRecord, OutcomeStatus};

pub fn manifest_path(dir: &Path, batch_id: &str) -> PathBuf {
    dir.join(format!("manifest_{}.csv", batch_id))
}

/// Write all rows of one batch. Called once, at batch end.
pub fn write_manifest(dir: &Path, batch_id: &str, rows: &[ManifestRow]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = manifest_path(dir, batch_id);
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(path)
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.with_context(|| format!("Invalid row in {}", path.display()))?);
    }
    Ok(rows)
}

/// Fold per-file outcomes into batch totals.
pub fn summarize(batch_id: &str, outcomes: &[OutcomeRecord], processing_ms: u64) -> BatchSummary {
    let mut summary = BatchSummary {
        batch_id: batch_id.to_string(),
        total: outcomes.len(),
        processing_ms,
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome.status() {
            OutcomeStatus::Success => summary.successful += 1,
            OutcomeStatus::Failed => summary.failed += 1,
            OutcomeStatus::Quarantined => summary.quarantined += 1,
        }
        summary.chunks_created += outcome.manifest.chunks_created;
    }
    summary
}

/// Success counts keyed by file type and by processor.
pub fn breakdown(rows: &[ManifestRow]) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
    let mut by_type = BTreeMap::new();
    let mut by_processor = BTreeMap::new();
    for row in rows.iter().filter(|r| r.status == OutcomeStatus::Success) {
        *by_type.entry(row.file_type.clone()).or_default() += 1;
        *by_processor.entry(row.processor.clone()).or_default() += 1;
    }
    (by_type, by_processor)
}
