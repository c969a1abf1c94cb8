//! Batch orchestration: routing, retry, quarantine and outcome recording.
//!
//! Each file moves through a small state machine:
//!
//! ```text
//! Pending ──validate──► Attempt ──ok──► Success (chunks, markdown, marker)
//!    │                    │  ▲
//!    │ input error        │  └── RetryableFailure (fixed delay)
//!    ▼                    ▼
//!  Failed          TerminalFailure ──► Quarantined (copy + narrative)
//! ```
//!
//! Input errors (missing file, unsupported type) are reported as `failed`
//! and never quarantined. Everything that fails after that point is decided
//! by [`RetryPolicy::decide`] from the error's class.
//!
//! Files inside one batch run sequentially, or across a rayon pool when
//! more than one batch worker is configured. Each worker owns one
//! [`WorkerResources`] for its whole share of the batch. The manifest and
//! the quarantine table are written once, after every file has finished.

use anyhow::Result;
use chrono::{Local, SecondsFormat, Utc};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::classify::classify_file;
use crate::config::{Config, StoragePaths};
use crate::error::{InputError, ProcessError, RetryDecision, RetryPolicy};
use crate::filetype::{compute_file_hash, doc_id, file_type_tag, FileKind};
use crate::handlers::{
    route, run_processor, FileJob, HandlerContext, HandlerOutput, Processor, ResourceFactory,
    WorkerResources,
};
use crate::manifest::{summarize, write_manifest};
use crate::models::{
    BatchSummary, ClassificationResult, CompletionMarker, InventoryRecord, ManifestRow,
    OutcomeRecord, OutcomeStatus, QuarantineRow,
};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::quarantine::{truncate_error, Quarantine};
use crate::store::{output_stem, ChunkStore};

const CLASSIFIER_STAGE: &str = "classifier";

/// `YYYYMMDD_HHMMSS_xxxx`, local time plus four random hex characters.
pub fn generate_batch_id() -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(4)
        .collect();
    format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), suffix)
}

/// One file handed to a batch, with whatever the inventory already knows.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub path: PathBuf,
    pub hash: Option<String>,
    pub classification: Option<ClassificationResult>,
}

impl WorkItem {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash: None,
            classification: None,
        }
    }
}

impl From<&InventoryRecord> for WorkItem {
    fn from(record: &InventoryRecord) -> Self {
        Self {
            path: record.file_path.clone(),
            hash: Some(record.hash_sha256.clone()),
            classification: record.classification(),
        }
    }
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    store: ChunkStore,
    quarantine: Quarantine,
    manifests_dir: PathBuf,
    factory: &'a dyn ResourceFactory,
    progress: &'a dyn ProgressReporter,
    policy: RetryPolicy,
    enrich: bool,
    workers: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        paths: &StoragePaths,
        factory: &'a dyn ResourceFactory,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            config,
            store: ChunkStore::new(paths),
            quarantine: Quarantine::new(paths),
            manifests_dir: paths.manifests.clone(),
            factory,
            progress,
            policy: RetryPolicy::new(
                config.processors.retry_attempts,
                Duration::from_secs(config.processors.retry_delay_secs),
            ),
            enrich: true,
            workers: config.processors.batch_workers,
        }
    }

    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Process one batch and write its manifest and quarantine rows.
    pub fn process_batch(&self, batch_id: &str, items: &[WorkItem]) -> Result<BatchSummary> {
        let started = Instant::now();
        let total = items.len() as u64;
        let done = AtomicU64::new(0);
        let workers = self.workers.min(items.len()).max(1);

        let run_share = |share: &[WorkItem]| -> Vec<OutcomeRecord> {
            let mut resources = WorkerResources::new(self.factory);
            share
                .iter()
                .map(|item| {
                    let outcome = self.process_with_retry(item, batch_id, &mut resources);
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    self.progress.report(ProgressEvent::FileDone {
                        batch_id: batch_id.to_string(),
                        file: outcome.manifest.file_name.clone(),
                        status: status_label(outcome.status()).to_string(),
                        n,
                        total,
                    });
                    outcome
                })
                .collect()
        };

        let outcomes: Vec<OutcomeRecord> = if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()?;
            let share_len = items.len().div_ceil(workers);
            pool.install(|| {
                items
                    .par_chunks(share_len)
                    .map(run_share)
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .flatten()
            .collect()
        } else {
            run_share(items)
        };

        let rows: Vec<ManifestRow> = outcomes.iter().map(|o| o.manifest.clone()).collect();
        let manifest_path = write_manifest(&self.manifests_dir, batch_id, &rows)?;
        let quarantined: Vec<QuarantineRow> =
            outcomes.iter().filter_map(|o| o.quarantine.clone()).collect();
        self.quarantine.append_rows(&quarantined)?;

        let mut summary = summarize(batch_id, &outcomes, started.elapsed().as_millis() as u64);
        summary.manifest_path = Some(manifest_path);
        if !quarantined.is_empty() {
            summary.quarantine_csv_path = Some(self.quarantine.csv_path().to_path_buf());
        }
        info!(
            batch_id,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            quarantined = summary.quarantined,
            chunks = summary.chunks_created,
            config_hash = %self.config.config_hash,
            "batch complete"
        );
        Ok(summary)
    }

    /// Drive one file to a terminal outcome.
    pub fn process_with_retry(
        &self,
        item: &WorkItem,
        batch_id: &str,
        resources: &mut WorkerResources,
    ) -> OutcomeRecord {
        let started = Instant::now();
        let kind = match validate_input(&item.path) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(file = %item.path.display(), error = %e, "skipping ineligible file");
                return self.failed(item, batch_id, &e.to_string(), started);
            }
        };

        // Always hash what is on disk now; the inventory may be older than
        // the file.
        let hash = match compute_file_hash(&item.path) {
            Ok(h) => h,
            Err(e) => {
                let err = ProcessError::from_anyhow(&e);
                return self.quarantined(item, None, CLASSIFIER_STAGE, batch_id, err, 0, started);
            }
        };
        let known = match &item.hash {
            Some(old) if *old != hash => {
                info!(file = %item.path.display(), "content changed since inventory; reclassifying");
                None
            }
            _ => item.classification.as_ref(),
        };

        let classification = match (kind, known) {
            (FileKind::Pdf, None) => match classify_file(&item.path, &self.config.classification) {
                Ok(c) => Some(c),
                Err(e) => {
                    let err = ProcessError::permanent(format!("Classification failed: {:#}", e));
                    return self.quarantined(item, Some(&hash), CLASSIFIER_STAGE, batch_id, err, 0, started);
                }
            },
            (_, c) => c.cloned(),
        };

        let processor = match route(kind, classification.as_ref()) {
            Ok(p) => p,
            Err(err) => {
                return self.quarantined(item, Some(&hash), CLASSIFIER_STAGE, batch_id, err, 0, started);
            }
        };

        let job = FileJob {
            path: item.path.clone(),
            kind,
            hash,
            classification,
        };
        let ctx = HandlerContext {
            config: self.config,
            batch_id,
            enrich: self.enrich,
        };

        let mut retries = 0u32;
        loop {
            match self.attempt(processor, &job, &ctx, resources, started) {
                Ok(output) => {
                    return self.succeeded(&job, processor, batch_id, output, retries, started)
                }
                Err(err) => match self.policy.decide(err.class, retries) {
                    RetryDecision::Retry => {
                        retries += 1;
                        warn!(
                            file = %job.path.display(),
                            class = %err.class,
                            attempt = retries,
                            error = %err,
                            "retrying"
                        );
                        std::thread::sleep(self.policy.delay);
                    }
                    RetryDecision::Quarantine => {
                        return self.quarantined(
                            item,
                            Some(&job.hash),
                            processor.name(),
                            batch_id,
                            err,
                            retries,
                            started,
                        );
                    }
                },
            }
        }
    }

    /// Run the processor and persist its output. The completion marker is
    /// written last.
    fn attempt(
        &self,
        processor: Processor,
        job: &FileJob,
        ctx: &HandlerContext,
        resources: &mut WorkerResources,
        started: Instant,
    ) -> Result<HandlerOutput, ProcessError> {
        let output = run_processor(processor, job, ctx, resources)?;
        let stem = output_stem(&job.path, &job.hash);
        let jsonl = self.store.write_records(&stem, &output.records)?;
        self.store.write_markdown(&stem, &output.markdown)?;
        let marker = CompletionMarker {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            file_path: job.path.display().to_string(),
            file_hash: job.hash.clone(),
            chunks: output.records.len(),
            processor: processor.name().to_string(),
            processing_duration_ms: started.elapsed().as_millis() as u64,
            config_version: self.config.metadata.config_version.clone(),
        };
        self.store.write_marker(&jsonl, &marker)?;
        Ok(output)
    }

    fn succeeded(
        &self,
        job: &FileJob,
        processor: Processor,
        batch_id: &str,
        output: HandlerOutput,
        retries: u32,
        started: Instant,
    ) -> OutcomeRecord {
        info!(
            file = %job.path.display(),
            processor = processor.name(),
            chunks = output.records.len(),
            retries,
            "processed"
        );
        let mut row = base_row(&job.path, Some(&job.hash), batch_id, started);
        row.processor = processor.name().to_string();
        row.status = OutcomeStatus::Success;
        row.page_count = output.page_count;
        row.chunks_created = output.records.len();
        row.char_count = output.markdown.chars().count();
        row.estimated_tokens = output.records.iter().map(|r| r.attrs.token_count).sum();
        row.warnings = output.warnings.join("; ");
        row.confidence_score = Some(output.confidence);
        OutcomeRecord {
            manifest: row,
            quarantine: None,
            retry_count: retries,
        }
    }

    fn failed(&self, item: &WorkItem, batch_id: &str, message: &str, started: Instant) -> OutcomeRecord {
        let mut row = base_row(&item.path, item.hash.as_deref(), batch_id, started);
        row.status = OutcomeStatus::Failed;
        row.error = truncate_error(message);
        OutcomeRecord {
            manifest: row,
            quarantine: None,
            retry_count: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn quarantined(
        &self,
        item: &WorkItem,
        hash: Option<&str>,
        processor: &str,
        batch_id: &str,
        err: ProcessError,
        retries: u32,
        started: Instant,
    ) -> OutcomeRecord {
        error!(
            file = %item.path.display(),
            processor,
            class = %err.class,
            retries,
            error = %err,
            "quarantining"
        );
        // A failed copy is recorded with an empty location and the reason,
        // never as a location that does not exist.
        let mut message = err.message.clone();
        let quarantine = match self
            .quarantine
            .quarantine_file(&item.path, processor, &err, retries)
        {
            Ok(row) => row,
            Err(e) => {
                error!(file = %item.path.display(), error = %format!("{:#}", e), "could not write quarantine copy");
                message = format!("{}; quarantine copy failed: {:#}", err.message, e);
                QuarantineRow {
                    file_path: item.path.display().to_string(),
                    file_name: file_name(&item.path),
                    file_type: file_type_tag(&item.path),
                    attempted_processor: processor.to_string(),
                    error_message: truncate_error(&message),
                    error_class: err.class.to_string(),
                    retry_count: retries,
                    quarantined_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    quarantine_location: String::new(),
                }
            }
        };
        let mut row = base_row(&item.path, hash, batch_id, started);
        row.processor = processor.to_string();
        row.status = OutcomeStatus::Quarantined;
        row.error = truncate_error(&message);
        OutcomeRecord {
            manifest: row,
            quarantine: Some(quarantine),
            retry_count: retries,
        }
    }
}

/// Check that a file exists, is a regular file, and has a supported type.
pub fn validate_input(path: &Path) -> Result<FileKind, InputError> {
    let meta = std::fs::metadata(path).map_err(|_| InputError::Missing(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(InputError::NotAFile(path.to_path_buf()));
    }
    FileKind::from_path(path).ok_or_else(|| InputError::Unsupported(path.to_path_buf()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Success => "success",
        OutcomeStatus::Failed => "failed",
        OutcomeStatus::Quarantined => "quarantined",
    }
}

fn base_row(path: &Path, hash: Option<&str>, batch_id: &str, started: Instant) -> ManifestRow {
    let hash = hash.unwrap_or_default();
    ManifestRow {
        doc_id: doc_id(hash).to_string(),
        file_path: path.display().to_string(),
        file_name: file_name(path),
        file_type: file_type_tag(path),
        processor: String::new(),
        status: OutcomeStatus::Failed,
        page_count: None,
        chunks_created: 0,
        processing_duration_ms: started.elapsed().as_millis() as u64,
        char_count: 0,
        estimated_tokens: 0,
        hash_sha256: hash.to_string(),
        batch_id: batch_id.to_string(),
        processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        warnings: String::new(),
        error: String::new(),
        confidence_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::enrich::{Embedder, EntityExtractor};
    use crate::extract::{ExtractedText, TextExtractor};
    use crate::manifest::read_manifest;
    use crate::models::{Confidence, DocClass};
    use crate::ocr::{OcrDocument, OcrEngine, OcrPage};
    use crate::progress::NoProgress;
    use crate::quarantine::read_rows;
    use crate::state::get_processed_hashes;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Text extractor that fails with a fixed error, counting calls.
    struct FailingText {
        message: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl TextExtractor for FailingText {
        fn extract(&self, _path: &Path) -> Result<ExtractedText, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProcessError::from_message(self.message))
        }
    }

    struct EchoOcr;

    impl OcrEngine for EchoOcr {
        fn recognize(&self, paths: &[PathBuf]) -> Result<Vec<OcrDocument>, ProcessError> {
            Ok(paths
                .iter()
                .map(|p| OcrDocument {
                    name: file_name(p),
                    pages: vec![OcrPage {
                        page: 1,
                        text: format!("Scanned text of {}.", file_name(p)),
                    }],
                })
                .collect())
        }
    }

    struct FakeFactory {
        message: &'static str,
        calls: Arc<AtomicUsize>,
        ocr_built: AtomicUsize,
    }

    impl FakeFactory {
        fn failing(message: &'static str) -> Self {
            Self {
                message,
                calls: Arc::new(AtomicUsize::new(0)),
                ocr_built: AtomicUsize::new(0),
            }
        }
    }

    impl ResourceFactory for FakeFactory {
        fn text_extractor(&self) -> Result<Box<dyn TextExtractor>, ProcessError> {
            Ok(Box::new(FailingText {
                message: self.message,
                calls: Arc::clone(&self.calls),
            }))
        }
        fn ocr_engine(&self) -> Result<Box<dyn OcrEngine>, ProcessError> {
            self.ocr_built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoOcr))
        }
        fn embedder(&self) -> Result<Option<Box<dyn Embedder>>, ProcessError> {
            Ok(None)
        }
        fn entity_extractor(&self) -> Result<Option<Box<dyn EntityExtractor>>, ProcessError> {
            Ok(None)
        }
    }

    fn setup() -> (TempDir, Config, StoragePaths) {
        let dir = TempDir::new().unwrap();
        let config = parse_config(&format!(
            "[storage]\nbase_dir = {:?}\n[processors]\nretry_attempts = 2\nretry_delay_secs = 0\n",
            dir.path().join("out").display().to_string()
        ))
        .unwrap();
        let paths = StoragePaths::from_config(&config);
        paths.ensure_dirs().unwrap();
        (dir, config, paths)
    }

    fn digital_pdf(dir: &Path) -> WorkItem {
        let path = dir.join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4 stand-in").unwrap();
        WorkItem {
            path,
            hash: None,
            classification: Some(ClassificationResult {
                doc_class: DocClass::Digital,
                percent_digital: 1.0,
                confidence: Confidence::High,
                total_pages: 1,
                digital_pages: 1,
                allowed: true,
                reason: "digital".into(),
                image_detection: None,
            }),
        }
    }

    #[test]
    fn test_timeout_is_retried_then_quarantined() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("Read timeout after 30s");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);
        let item = digital_pdf(dir.path());

        let summary = orch.process_batch("b1", std::slice::from_ref(&item)).unwrap();
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.quarantined, 1);
        assert!(item.path.exists());

        let rows = read_rows(&paths.quarantine_csv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].retry_count, 2);
        assert_eq!(rows[0].error_class, "transient");
        assert_eq!(rows[0].attempted_processor, "pdf_text");

        let manifest = read_manifest(&summary.manifest_path.unwrap()).unwrap();
        assert_eq!(manifest[0].status, OutcomeStatus::Quarantined);
    }

    #[test]
    fn test_corrupted_is_quarantined_without_retry() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("PDF file is corrupted");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);
        let mut resources = WorkerResources::new(&factory);

        let outcome = orch.process_with_retry(&digital_pdf(dir.path()), "b", &mut resources);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.status(), OutcomeStatus::Quarantined);
        assert_eq!(outcome.retry_count, 0);
    }

    #[test]
    fn test_unclassified_is_retried_once() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("something odd happened");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);
        let mut resources = WorkerResources::new(&factory);

        let outcome = orch.process_with_retry(&digital_pdf(dir.path()), "b", &mut resources);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.retry_count, 1);
    }

    #[test]
    fn test_missing_file_fails_without_quarantine() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("unused");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);

        let item = WorkItem::from_path(dir.path().join("ghost.docx"));
        let summary = orch.process_batch("b", &[item]).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.quarantined, 0);
        assert!(summary.quarantine_csv_path.is_none());
        assert!(!paths.quarantine_csv.exists());
    }

    #[test]
    fn test_success_writes_outputs_and_marker() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("unused");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);

        let csv = dir.path().join("parts.csv");
        std::fs::write(&csv, "name,qty\nbolt,4\nnut,9\n").unwrap();
        let hash = compute_file_hash(&csv).unwrap();

        let summary = orch.process_batch("b", &[WorkItem::from_path(&csv)]).unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.chunks_created, 1);

        let stem = output_stem(&csv, &hash);
        assert!(paths.jsonl.join(format!("{}.jsonl", stem)).exists());
        assert!(paths.jsonl.join(format!("{}_SUCCESS", stem)).exists());
        assert!(paths.markdown.join(format!("{}.md", stem)).exists());
        assert!(get_processed_hashes(&paths).unwrap().contains(&hash));

        let manifest = read_manifest(&summary.manifest_path.unwrap()).unwrap();
        assert_eq!(manifest[0].processor, "tabular");
        assert_eq!(manifest[0].doc_id, &hash[..16]);
    }

    #[test]
    fn test_parallel_batch_builds_resources_once_per_worker() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("unused");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress).with_workers(2);

        let items: Vec<WorkItem> = (0..4)
            .map(|i| {
                let p = dir.path().join(format!("scan{}.png", i));
                std::fs::write(&p, format!("png {}", i)).unwrap();
                WorkItem::from_path(p)
            })
            .collect();
        let summary = orch.process_batch("b", &items).unwrap();
        assert_eq!(summary.successful, 4);
        assert_eq!(factory.ocr_built.load(Ordering::SeqCst), 2);

        let manifest = read_manifest(&summary.manifest_path.unwrap()).unwrap();
        let names: Vec<&str> = manifest.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["scan0.png", "scan1.png", "scan2.png", "scan3.png"]);
    }

    #[test]
    fn test_rejected_pdf_is_quarantined() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("unused");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);
        let mut item = digital_pdf(dir.path());
        if let Some(c) = item.classification.as_mut() {
            c.doc_class = DocClass::Rejected;
            c.allowed = false;
        }
        let mut resources = WorkerResources::new(&factory);
        let outcome = orch.process_with_retry(&item, "b", &mut resources);
        assert_eq!(outcome.status(), OutcomeStatus::Quarantined);
        assert_eq!(outcome.manifest.processor, CLASSIFIER_STAGE);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_content_changed_after_inventory_uses_current_hash() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("unused");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);

        let csv = dir.path().join("parts.csv");
        std::fs::write(&csv, "name,qty\nbolt,4\n").unwrap();
        let inventoried = compute_file_hash(&csv).unwrap();
        std::fs::write(&csv, "name,qty\nbolt,4\nwasher,12\n").unwrap();
        let current = compute_file_hash(&csv).unwrap();

        let item = WorkItem {
            path: csv.clone(),
            hash: Some(inventoried.clone()),
            classification: None,
        };
        let summary = orch.process_batch("b", &[item]).unwrap();
        assert_eq!(summary.successful, 1);

        let processed = get_processed_hashes(&paths).unwrap();
        assert!(processed.contains(&current));
        assert!(!processed.contains(&inventoried));

        let manifest = read_manifest(&summary.manifest_path.unwrap()).unwrap();
        assert_eq!(manifest[0].hash_sha256, current);
        let records = crate::store::read_records(
            &paths.jsonl.join(format!("{}.jsonl", output_stem(&csv, &current))),
        )
        .unwrap();
        assert!(records.iter().all(|r| r.metadata.hash_input_sha256 == current));
    }

    #[test]
    fn test_changed_pdf_is_reclassified_not_trusted() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("unused");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);
        let mut item = digital_pdf(dir.path());
        item.hash = Some("0".repeat(64));

        // The stand-in bytes are not a parseable PDF, so a fresh
        // classification fails instead of routing to the text extractor.
        let mut resources = WorkerResources::new(&factory);
        let outcome = orch.process_with_retry(&item, "b", &mut resources);
        assert_eq!(outcome.status(), OutcomeStatus::Quarantined);
        assert_eq!(outcome.manifest.processor, CLASSIFIER_STAGE);
        assert!(outcome.manifest.error.contains("Classification failed"));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_quarantine_copy_is_reported() {
        let (dir, config, paths) = setup();
        let factory = FakeFactory::failing("PDF file is corrupted");
        let orch = Orchestrator::new(&config, &paths, &factory, &NoProgress);
        std::fs::remove_dir_all(&paths.quarantine).unwrap();
        std::fs::write(&paths.quarantine, b"not a directory").unwrap();

        let mut resources = WorkerResources::new(&factory);
        let outcome = orch.process_with_retry(&digital_pdf(dir.path()), "b", &mut resources);
        assert_eq!(outcome.status(), OutcomeStatus::Quarantined);
        let row = outcome.quarantine.unwrap();
        assert!(row.quarantine_location.is_empty());
        assert!(row.error_message.contains("quarantine copy failed"));
        assert!(outcome.manifest.error.contains("quarantine copy failed"));
    }

    #[test]
    fn test_batch_id_shape() {
        let id = generate_batch_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
