//! Inventory building: discovery, parallel classification, CSV persistence.
//!
//! # Pipeline
//!
//! ```text
//! input_dir ──walkdir + globset──► candidate paths (sorted)
//!                                        │
//!                      rayon pool, min(workers, cores, files)
//!                                        │
//!                hash + classify (PDF only) per file
//!                                        │
//!                                        ▼
//!                             inventory/inventory.csv
//! ```
//!
//! Non-PDF files carry no classification and are always allowed. A PDF
//! whose classification fails is kept with `allowed = false` so the failure
//! stays visible in the CSV.

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::classify::classify_file;
use crate::config::{ClassificationConfig, Config, DiscoveryConfig};
use crate::filetype::{compute_file_hash, file_type_tag, is_supported, mime_type, FileKind};
use crate::models::{DocClass, InventoryRecord};
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortOrder {
    /// File name, case-insensitive.
    #[default]
    Name,
    /// Oldest modification time first.
    Mtime,
    /// Newest modification time first.
    MtimeDesc,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn modified(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn sort_by_path<T>(items: &mut [T], order: SortOrder, path_of: impl Fn(&T) -> &Path) {
    let name_key = |p: &Path| {
        (
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            p.to_path_buf(),
        )
    };
    match order {
        SortOrder::Name => items.sort_by_cached_key(|t| name_key(path_of(t))),
        SortOrder::Mtime => items.sort_by_cached_key(|t| {
            let p = path_of(t);
            (modified(p), name_key(p))
        }),
        SortOrder::MtimeDesc => items.sort_by_cached_key(|t| {
            let p = path_of(t);
            (std::cmp::Reverse(modified(p)), name_key(p))
        }),
    }
}

pub fn sort_paths(paths: &mut [PathBuf], order: SortOrder) {
    sort_by_path(paths, order, |p| p.as_path());
}

pub fn sort_records(records: &mut [InventoryRecord], order: SortOrder) {
    sort_by_path(records, order, |r| r.file_path.as_path());
}

/// Supported files under `root` that pass the include/exclude globs.
pub fn discover_files(root: &Path, config: &DiscoveryConfig, order: SortOrder) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Input directory does not exist: {}", root.display());
    }
    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();
        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        if is_supported(path) {
            files.push(path.to_path_buf());
        }
    }
    sort_paths(&mut files, order);
    Ok(files)
}

/// Hash and (for PDFs) classify one file. `None` when the file cannot be
/// read at all.
pub fn build_record(path: &Path, config: &ClassificationConfig) -> Option<InventoryRecord> {
    let size_bytes = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "skipping unreadable file");
            return None;
        }
    };
    let hash_sha256 = match compute_file_hash(path) {
        Ok(h) => h,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "skipping unhashable file");
            return None;
        }
    };

    let mut record = InventoryRecord {
        file_path: path.to_path_buf(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_type: file_type_tag(path),
        mime_type: mime_type(path).to_string(),
        size_bytes,
        hash_sha256,
        detected_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        total_pages: None,
        digital_pages: None,
        percent_digital: None,
        classification_type: None,
        classification_confidence: None,
        allowed: true,
        rejection_reason: None,
    };

    if FileKind::from_path(path) == Some(FileKind::Pdf) {
        match classify_file(path, config) {
            Ok(c) => {
                record.total_pages = Some(c.total_pages);
                record.digital_pages = Some(c.digital_pages);
                record.percent_digital = Some(c.percent_digital);
                record.classification_type = Some(c.doc_class);
                record.classification_confidence = Some(c.confidence);
                record.allowed = c.allowed;
                record.rejection_reason = (!c.allowed).then_some(c.reason);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "classification failed");
                record.allowed = false;
                record.rejection_reason = Some(format!("Classification failed: {:#}", e));
            }
        }
    }
    Some(record)
}

/// Classify `files` on a rayon pool sized `min(workers, cores, files)`.
/// Output order follows input order.
pub fn classify_files(
    files: &[PathBuf],
    config: &ClassificationConfig,
    workers: usize,
    progress: &dyn ProgressReporter,
) -> Result<Vec<InventoryRecord>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let threads = workers.min(num_cpus::get()).min(files.len()).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("Failed to build classification pool")?;
    info!(files = files.len(), threads, "classifying");

    let total = files.len() as u64;
    let done = AtomicU64::new(0);
    let records: Vec<Option<InventoryRecord>> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let record = build_record(path, config);
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(ProgressEvent::Classifying { n, total });
                record
            })
            .collect()
    });
    Ok(records.into_iter().flatten().collect())
}

/// Discover and classify everything under the configured input directory.
pub fn build_inventory(
    root: &Path,
    config: &Config,
    order: SortOrder,
    progress: &dyn ProgressReporter,
) -> Result<Vec<InventoryRecord>> {
    progress.report(ProgressEvent::Discovering {
        root: root.display().to_string(),
    });
    let files = discover_files(root, &config.discovery, order)?;
    classify_files(
        &files,
        &config.classification,
        config.processors.classify_workers,
        progress,
    )
}

pub fn write_inventory(path: &Path, records: &[InventoryRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_inventory(path: &Path) -> Result<Vec<InventoryRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open inventory {}", path.display()))?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record.with_context(|| format!("Invalid row in {}", path.display()))?);
    }
    Ok(records)
}

#[derive(Debug, Clone, Default)]
pub struct InventoryFilter {
    pub allowed_only: bool,
    /// Type tags such as `.pdf`; a missing dot is tolerated.
    pub file_types: Vec<String>,
    pub pdf_type: Option<DocClass>,
}

pub fn filter_inventory(records: Vec<InventoryRecord>, filter: &InventoryFilter) -> Vec<InventoryRecord> {
    let types: Vec<String> = filter
        .file_types
        .iter()
        .map(|t| {
            let t = t.trim().to_ascii_lowercase();
            if t.starts_with('.') {
                t
            } else {
                format!(".{}", t)
            }
        })
        .collect();
    records
        .into_iter()
        .filter(|r| !filter.allowed_only || r.allowed)
        .filter(|r| types.is_empty() || types.contains(&r.file_type))
        .filter(|r| match filter.pdf_type {
            None => true,
            Some(want) => r.file_type != ".pdf" || r.classification_type == Some(want),
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct InventoryStats {
    pub total: usize,
    pub allowed: usize,
    pub rejected: usize,
    pub total_bytes: u64,
    pub by_type: BTreeMap<String, usize>,
    pub by_class: BTreeMap<String, usize>,
}

pub fn inventory_stats(records: &[InventoryRecord]) -> InventoryStats {
    let mut stats = InventoryStats::default();
    for r in records {
        stats.total += 1;
        stats.total_bytes += r.size_bytes;
        if r.allowed {
            stats.allowed += 1;
        } else {
            stats.rejected += 1;
        }
        *stats.by_type.entry(r.file_type.clone()).or_default() += 1;
        if let Some(class) = r.classification_type {
            *stats.by_class.entry(class.to_string()).or_default() += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    fn touch(dir: &Path, rel: &str, body: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_discovery_filters_and_sorts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.docx", b"x");
        touch(dir.path(), "sub/A.CSV", b"x");
        touch(dir.path(), "notes.txt", b"x");
        touch(dir.path(), "skip/c.png", b"x");
        let config = DiscoveryConfig {
            exclude_globs: vec!["skip/**".into()],
            ..Default::default()
        };
        let files = discover_files(dir.path(), &config, SortOrder::Name).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A.CSV", "b.docx"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let err = discover_files(Path::new("/no/such/dir"), &DiscoveryConfig::default(), SortOrder::Name);
        assert!(err.is_err());
    }

    #[test]
    fn test_broken_pdf_is_kept_but_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = touch(dir.path(), "broken.pdf", b"not a pdf at all");
        let csv = touch(dir.path(), "t.csv", b"a,b\n1,2\n");
        let records = classify_files(
            &[pdf, csv],
            &ClassificationConfig::default(),
            4,
            &NoProgress,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].allowed);
        assert!(records[0]
            .rejection_reason
            .as_deref()
            .unwrap()
            .starts_with("Classification failed"));
        assert!(records[1].allowed);
        assert!(records[1].classification_type.is_none());
        assert_eq!(records[1].hash_sha256.len(), 64);
    }

    #[test]
    fn test_csv_round_trip_filter_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = touch(dir.path(), "broken.pdf", b"nope");
        let docx = touch(dir.path(), "a.docx", b"x");
        let records =
            classify_files(&[pdf, docx], &ClassificationConfig::default(), 2, &NoProgress).unwrap();

        let csv_path = dir.path().join("inventory").join("inventory.csv");
        write_inventory(&csv_path, &records).unwrap();
        let loaded = load_inventory(&csv_path).unwrap();
        assert_eq!(loaded, records);

        let allowed = filter_inventory(
            loaded.clone(),
            &InventoryFilter {
                allowed_only: true,
                ..Default::default()
            },
        );
        assert_eq!(allowed.len(), 1);
        let docx_only = filter_inventory(
            loaded.clone(),
            &InventoryFilter {
                file_types: vec!["DOCX".into()],
                ..Default::default()
            },
        );
        assert_eq!(docx_only[0].file_name, "a.docx");

        let stats = inventory_stats(&loaded);
        assert_eq!((stats.total, stats.allowed, stats.rejected), (2, 1, 1));
        assert_eq!(stats.by_type[".pdf"], 1);
    }

    #[test]
    fn test_sort_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "z.csv", b"x");
        let new = touch(dir.path(), "a.csv", b"x");
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();
        let mut paths = vec![new.clone(), old.clone()];
        sort_paths(&mut paths, SortOrder::Mtime);
        assert_eq!(paths, vec![old.clone(), new.clone()]);
        sort_paths(&mut paths, SortOrder::MtimeDesc);
        assert_eq!(paths, vec![new, old]);
    }
}
