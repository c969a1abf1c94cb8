//! Command implementations behind the `intake` CLI.
//!
//! Coordinates the full run: run guard → inventory (or manual file list) →
//! skip-if-processed → batches through the orchestrator → summaries.
//! Per-file failures never abort a run; guard, config and input-directory
//! failures do.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::classify::classify_file;
use crate::config::{Config, StoragePaths};
use crate::filetype::compute_file_hash;
use crate::handlers::ServiceFactory;
use crate::inventory::{
    build_inventory, filter_inventory, inventory_stats, load_inventory, sort_paths, sort_records,
    write_inventory, InventoryFilter, SortOrder,
};
use crate::lock::{check_mount_health, RunLock};
use crate::manifest::{breakdown, read_manifest};
use crate::models::{BatchSummary, DocClass, InventoryRecord};
use crate::orchestrator::{generate_batch_id, Orchestrator, WorkItem};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::quarantine::quarantine_stats;
use crate::state::{clear_state, filter_unprocessed, get_processed_hashes, state_status};

/// Options for `intake process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub files: Vec<PathBuf>,
    pub auto: bool,
    pub file_types: Vec<String>,
    pub pdf_type: Option<DocClass>,
    pub batch_size: usize,
    pub sort_by: SortOrder,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub workers: Option<usize>,
    pub skip_enrichment: bool,
    pub rebuild_inventory: bool,
    pub no_skip_processed: bool,
    pub reprocess_all: bool,
    pub reprocess_hash: Option<String>,
}

/// Mount probe plus the run lock. Held for the whole command.
fn guard(config: &Config, paths: &StoragePaths) -> Result<RunLock> {
    check_mount_health(&paths.base)?;
    let lock = RunLock::acquire(
        &paths.lock_file,
        Duration::from_secs(config.processors.lock_timeout_secs),
    )?;
    paths.ensure_dirs()?;
    Ok(lock)
}

fn input_dir(paths: &StoragePaths) -> Result<&Path> {
    let dir = paths
        .input
        .as_deref()
        .context("storage.input_dir must be set for auto discovery")?;
    if !dir.is_dir() {
        bail!("Input directory does not exist: {}", dir.display());
    }
    Ok(dir)
}

/// Load the inventory CSV, or build it when asked to or when it is missing.
fn inventory_records(
    config: &Config,
    paths: &StoragePaths,
    order: SortOrder,
    rebuild: bool,
    progress: &dyn ProgressReporter,
) -> Result<Vec<InventoryRecord>> {
    let root = input_dir(paths)?;
    if rebuild || !paths.inventory_csv.exists() {
        let records = build_inventory(root, config, order, progress)?;
        write_inventory(&paths.inventory_csv, &records)?;
        info!(records = records.len(), path = %paths.inventory_csv.display(), "inventory written");
        Ok(records)
    } else {
        let mut records = load_inventory(&paths.inventory_csv)?;
        sort_records(&mut records, order);
        Ok(records)
    }
}

fn hash_matches(hash: &str, prefix: Option<&str>) -> bool {
    prefix.is_some_and(|p| hash.starts_with(p))
}

pub fn run_process(
    config: &Config,
    opts: &ProcessOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    if opts.files.is_empty() && !opts.auto {
        bail!("Nothing to process: pass FILES or --auto");
    }
    let paths = StoragePaths::from_config(config);
    let _lock = guard(config, &paths)?;

    // Reprocess flags clear markers for real, except in a dry run.
    let reprocess_hash = opts.reprocess_hash.as_deref();
    if !opts.dry_run {
        if opts.reprocess_all {
            let n = clear_state(&paths, None)?;
            println!("Cleared {} completion markers", n);
        } else if let Some(h) = reprocess_hash {
            let n = clear_state(&paths, Some(h))?;
            println!("Cleared {} completion markers matching {}", n, h);
        }
    }
    let processed: HashSet<String> = if opts.no_skip_processed || opts.reprocess_all {
        HashSet::new()
    } else {
        get_processed_hashes(&paths)?
            .into_iter()
            .filter(|h| !hash_matches(h, reprocess_hash))
            .collect()
    };

    let mut items: Vec<WorkItem> = if opts.auto {
        let records = inventory_records(config, &paths, opts.sort_by, opts.rebuild_inventory, progress)?;
        let filter = InventoryFilter {
            allowed_only: true,
            file_types: opts.file_types.clone(),
            pdf_type: opts.pdf_type,
        };
        let records = filter_inventory(records, &filter);
        let before = records.len();
        let records = filter_unprocessed(records, &processed);
        if before > records.len() {
            println!("Skipping {} already processed files", before - records.len());
        }
        records.iter().map(WorkItem::from).collect()
    } else {
        let mut files = opts.files.clone();
        sort_paths(&mut files, opts.sort_by);
        let mut items = Vec::new();
        let mut skipped = 0;
        for path in files {
            let hash = compute_file_hash(&path).ok();
            if hash.as_ref().is_some_and(|h| processed.contains(h)) {
                skipped += 1;
                continue;
            }
            items.push(WorkItem {
                path,
                hash,
                classification: None,
            });
        }
        if skipped > 0 {
            println!("Skipping {} already processed files", skipped);
        }
        items
    };
    if let Some(limit) = opts.limit {
        items.truncate(limit);
    }

    let batch_size = opts.batch_size.max(1);
    let batches = items.len().div_ceil(batch_size);

    if opts.dry_run {
        println!("process (dry-run)");
        println!("  files to process: {}", items.len());
        println!("  batches: {} (batch size {})", batches, batch_size);
        for item in &items {
            let class = item
                .classification
                .as_ref()
                .map(|c| c.doc_class.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {}  [{}]", item.path.display(), class);
        }
        return Ok(());
    }

    if items.is_empty() {
        println!("Nothing to process.");
        return Ok(());
    }

    let factory = ServiceFactory::new(config);
    let mut orchestrator = Orchestrator::new(config, &paths, &factory, progress)
        .with_enrichment(!opts.skip_enrichment);
    if let Some(workers) = opts.workers {
        orchestrator = orchestrator.with_workers(workers);
    }

    let mut totals = BatchSummary::default();
    for (i, batch) in items.chunks(batch_size).enumerate() {
        let batch_id = generate_batch_id();
        progress.report(ProgressEvent::BatchStarted {
            batch_id: batch_id.clone(),
            batch: i as u64 + 1,
            batches: batches as u64,
            files: batch.len() as u64,
        });
        let summary = orchestrator.process_batch(&batch_id, batch)?;
        print_batch_summary(&summary);
        totals.total += summary.total;
        totals.successful += summary.successful;
        totals.failed += summary.failed;
        totals.quarantined += summary.quarantined;
        totals.chunks_created += summary.chunks_created;
        totals.processing_ms += summary.processing_ms;
    }

    if batches > 1 {
        println!("all batches");
        println!("  files: {}", totals.total);
        println!("  successful: {}", totals.successful);
        println!("  failed: {}", totals.failed);
        println!("  quarantined: {}", totals.quarantined);
        println!("  chunks created: {}", totals.chunks_created);
    }
    if totals.quarantined > 0 {
        warn!(quarantined = totals.quarantined, "some files were quarantined");
    }
    println!("ok");
    Ok(())
}

fn print_batch_summary(summary: &BatchSummary) {
    println!("batch {}", summary.batch_id);
    println!("  files: {}", summary.total);
    println!("  successful: {}", summary.successful);
    println!("  failed: {}", summary.failed);
    println!("  quarantined: {}", summary.quarantined);
    println!("  chunks created: {}", summary.chunks_created);
    println!("  time: {:.1}s", summary.processing_ms as f64 / 1000.0);
    if let Some(path) = &summary.manifest_path {
        println!("  manifest: {}", path.display());
        if let Ok(rows) = read_manifest(path) {
            let (by_type, by_processor) = breakdown(&rows);
            for (t, n) in by_type {
                println!("    type {}: {}", t, n);
            }
            for (p, n) in by_processor {
                println!("    processor {}: {}", p, n);
            }
        }
    }
    if let Some(path) = &summary.quarantine_csv_path {
        println!("  quarantine: {}", path.display());
    }
}

pub fn run_inventory(config: &Config, order: SortOrder, progress: &dyn ProgressReporter) -> Result<()> {
    let paths = StoragePaths::from_config(config);
    let _lock = guard(config, &paths)?;
    let records = inventory_records(config, &paths, order, true, progress)?;
    let stats = inventory_stats(&records);

    println!("inventory {}", paths.inventory_csv.display());
    println!("  files: {}", stats.total);
    println!("  allowed: {}", stats.allowed);
    println!("  rejected: {}", stats.rejected);
    println!("  size: {:.1} MB", stats.total_bytes as f64 / (1024.0 * 1024.0));
    for (t, n) in &stats.by_type {
        println!("  type {}: {}", t, n);
    }
    for (c, n) in &stats.by_class {
        println!("  pdf {}: {}", c, n);
    }
    Ok(())
}

pub fn run_classify(config: &Config, files: &[PathBuf]) -> Result<()> {
    for path in files {
        match classify_file(path, &config.classification) {
            Ok(c) => {
                println!("{}", path.display());
                println!(
                    "  type: {}  confidence: {}  allowed: {}",
                    c.doc_class,
                    format!("{:?}", c.confidence).to_lowercase(),
                    c.allowed
                );
                println!(
                    "  pages: {} digital / {} total ({:.1}%)",
                    c.digital_pages,
                    c.total_pages,
                    c.percent_digital * 100.0
                );
                if let Some(s) = &c.image_detection {
                    println!(
                        "  image sampling: {} of {} sampled pages are full-page scans",
                        s.scan_pages, s.sampled_pages
                    );
                }
                println!("  reason: {}", c.reason);
            }
            Err(e) => println!("{}\n  error: {:#}", path.display(), e),
        }
    }
    Ok(())
}

pub fn run_state_status(config: &Config) -> Result<()> {
    let paths = StoragePaths::from_config(config);
    let status = state_status(&paths)?;
    println!("state");
    println!("  completion markers: {}", status.markers);
    println!("  processed hashes: {}", status.processed_hashes);
    println!("  cache: {}", status.cache_path.display());
    println!(
        "  cache built: {}{}",
        status.cache_built_at.as_deref().unwrap_or("never"),
        if status.cache_fresh { "" } else { " (stale, rebuilt)" }
    );
    Ok(())
}

pub fn run_state_clear(config: &Config, hash: Option<&str>) -> Result<()> {
    let paths = StoragePaths::from_config(config);
    let _lock = guard(config, &paths)?;
    let removed = clear_state(&paths, hash)?;
    match hash {
        Some(h) => println!("Cleared {} completion markers matching {}", removed, h),
        None => println!("Cleared {} completion markers", removed),
    }
    Ok(())
}

pub fn run_quarantine_stats(config: &Config) -> Result<()> {
    let paths = StoragePaths::from_config(config);
    let stats = quarantine_stats(&paths.quarantine_csv)?;
    println!("quarantine {}", paths.quarantine_csv.display());
    println!("  files: {}", stats.total);
    for (label, map) in [
        ("type", &stats.by_file_type),
        ("processor", &stats.by_processor),
        ("class", &stats.by_error_class),
    ] {
        for (k, n) in map {
            println!("  {} {}: {}", label, k, n);
        }
    }
    Ok(())
}
