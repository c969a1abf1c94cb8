//! Terminal-failure storage.
//!
//! A quarantined file is copied (never moved) to
//! `quarantine/<YYYYMMDD_HHMMSS>/` (suffixed `_1`, `_2`, ... when that name
//! is already taken in the same second) together with a `<stem>_error.txt`
//! narrative, and gets one row in the append-only `quarantine.csv`.

use anyhow::{bail, Context, Result};
use chrono::{Local, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::config::StoragePaths;
use crate::error::ProcessError;
use crate::filetype::file_type_tag;
use crate::models::QuarantineRow;

pub const MAX_ERROR_CHARS: usize = 500;
const MAX_SLOTS: usize = 1000;

pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_CHARS {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
    csv_path: PathBuf,
}

impl Quarantine {
    pub fn new(paths: &StoragePaths) -> Self {
        Self {
            dir: paths.quarantine.clone(),
            csv_path: paths.quarantine_csv.clone(),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Preserve `source` and describe why it failed.
    ///
    /// Fails when the original cannot be copied; a row is only returned
    /// for a copy that exists.
    pub fn quarantine_file(
        &self,
        source: &Path,
        processor: &str,
        error: &ProcessError,
        retry_count: u32,
    ) -> Result<QuarantineRow> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        let stem = source
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let mut original = File::open(source)
            .with_context(|| format!("Failed to open {} for quarantine", source.display()))?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (target_dir, copy, mut target) = claim_slot(&self.dir, &stamp, &file_name)?;
        if let Err(e) = io::copy(&mut original, &mut target) {
            drop(target);
            let _ = std::fs::remove_file(&copy);
            return Err(e)
                .with_context(|| format!("Failed to copy {} into quarantine", source.display()));
        }

        let quarantined_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let narrative = format!(
            "File: {}\nProcessor: {}\nError class: {}\nRetries: {}\nQuarantined at: {}\n\nError:\n{}\n",
            source.display(),
            processor,
            error.class,
            retry_count,
            quarantined_at,
            error.message
        );
        let narrative_path = target_dir.join(format!("{}_error.txt", stem));
        std::fs::write(&narrative_path, narrative)
            .with_context(|| format!("Failed to write {}", narrative_path.display()))?;

        Ok(QuarantineRow {
            file_path: source.display().to_string(),
            file_name,
            file_type: file_type_tag(source),
            attempted_processor: processor.to_string(),
            error_message: truncate_error(&error.message),
            error_class: error.class.to_string(),
            retry_count,
            quarantined_at,
            quarantine_location: copy.display().to_string(),
        })
    }

    /// Append rows to `quarantine.csv`; the header is written only when the
    /// file is new.
    pub fn append_rows(&self, rows: &[QuarantineRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.csv_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = std::fs::metadata(&self.csv_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Failed to open {}", self.csv_path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Create `<dir>/<stamp>/<file_name>` without overwriting anything. A name
/// already taken in that second moves to `<stamp>_1`, `<stamp>_2`, ...
fn claim_slot(dir: &Path, stamp: &str, file_name: &str) -> Result<(PathBuf, PathBuf, File)> {
    for n in 0..MAX_SLOTS {
        let target_dir = if n == 0 {
            dir.join(stamp)
        } else {
            dir.join(format!("{}_{}", stamp, n))
        };
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;
        let copy = target_dir.join(file_name);
        match OpenOptions::new().write(true).create_new(true).open(&copy) {
            Ok(file) => return Ok((target_dir, copy, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", copy.display()))
            }
        }
    }
    bail!("No free quarantine slot for {} under {}", file_name, dir.display())
}

#[derive(Debug, Clone, Default)]
pub struct QuarantineStats {
    pub total: usize,
    pub by_file_type: BTreeMap<String, usize>,
    pub by_processor: BTreeMap<String, usize>,
    pub by_error_class: BTreeMap<String, usize>,
}

pub fn read_rows(csv_path: &Path) -> Result<Vec<QuarantineRow>> {
    if !csv_path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.with_context(|| format!("Invalid row in {}", csv_path.display()))?);
    }
    Ok(rows)
}

pub fn quarantine_stats(csv_path: &Path) -> Result<QuarantineStats> {
    let mut stats = QuarantineStats::default();
    for row in read_rows(csv_path)? {
        stats.total += 1;
        *stats.by_file_type.entry(row.file_type).or_default() += 1;
        *stats.by_processor.entry(row.attempted_processor).or_default() += 1;
        *stats.by_error_class.entry(row.error_class).or_default() += 1;
    }
    Ok(stats)
}
