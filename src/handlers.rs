//! Per-format processors and the worker-owned resources they use.
//!
//! | File | Classification | Processor |
//! |------|----------------|-----------|
//! | `.pdf` | digital | [`Processor::PdfText`] |
//! | `.pdf` | scanned | [`Processor::Ocr`] |
//! | `.pdf` | rejected | not routed (permanent error) |
//! | image | n/a | [`Processor::Ocr`] |
//! | `.docx` | n/a | [`Processor::Docx`] |
//! | `.xlsx`, `.csv` | n/a | [`Processor::Tabular`] |
//!
//! Expensive collaborators (OCR client, embedder, entity extractor) live in
//! a [`WorkerResources`] owned by one worker. Each handle is built on first
//! use from the shared [`ResourceFactory`] and then reused for every file
//! that worker processes.

use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::chunk::{chunk_document, RecordTemplate};
use crate::config::{Config, EmbeddingConfig, EntitiesConfig, OcrConfig};
use crate::enrich::{enrich_records, ChatEntityExtractor, Embedder, EntityExtractor, OpenAiEmbedder};
use crate::error::ProcessError;
use crate::extract::{extract_docx_file, read_csv, read_workbook, PdfTextExtractor, TextExtractor};
use crate::filetype::{doc_id, file_type_tag, mime_type, FileKind};
use crate::models::{ChunkMetadata, ChunkRecord, ClassificationResult, DocClass, SourceInfo};
use crate::ocr::{HttpOcrEngine, OcrDocument, OcrEngine};
use crate::table::chunk_sheets;

const DIGITAL_CONFIDENCE: f64 = 1.0;
const OCR_CONFIDENCE: f64 = 0.85;
/// Below this many characters per page a digital PDF is flagged.
const LOW_YIELD_CHARS_PER_PAGE: usize = 100;
/// How much of a chunk's opening text is used to find its page.
const PAGE_MATCH_CHARS: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processor {
    PdfText,
    Ocr,
    Docx,
    Tabular,
}

impl Processor {
    pub fn name(self) -> &'static str {
        match self {
            Processor::PdfText => "pdf_text",
            Processor::Ocr => "ocr",
            Processor::Docx => "docx",
            Processor::Tabular => "tabular",
        }
    }
}

/// Pick the processor for a file. Paged documents need a classification.
pub fn route(
    kind: FileKind,
    classification: Option<&ClassificationResult>,
) -> Result<Processor, ProcessError> {
    match kind {
        FileKind::Pdf => match classification.map(|c| c.doc_class) {
            Some(DocClass::Digital) => Ok(Processor::PdfText),
            Some(DocClass::Scanned) => Ok(Processor::Ocr),
            Some(DocClass::Rejected) => Err(ProcessError::permanent(format!(
                "unsupported document, rejected by classifier: {}",
                classification.map(|c| c.reason.as_str()).unwrap_or_default()
            ))),
            None => Err(ProcessError::permanent("PDF routed without a classification")),
        },
        FileKind::Image => Ok(Processor::Ocr),
        FileKind::Docx => Ok(Processor::Docx),
        FileKind::Xlsx | FileKind::Csv => Ok(Processor::Tabular),
    }
}

/// Builds the expensive collaborators. Shared by all workers.
pub trait ResourceFactory: Send + Sync {
    fn text_extractor(&self) -> Result<Box<dyn TextExtractor>, ProcessError>;
    fn ocr_engine(&self) -> Result<Box<dyn OcrEngine>, ProcessError>;
    /// `None` when embeddings are disabled.
    fn embedder(&self) -> Result<Option<Box<dyn Embedder>>, ProcessError>;
    /// `None` when entity extraction is disabled.
    fn entity_extractor(&self) -> Result<Option<Box<dyn EntityExtractor>>, ProcessError>;
}

/// Production factory: `pdf-extract` text layer plus HTTP services.
#[derive(Debug, Clone)]
pub struct ServiceFactory {
    ocr: OcrConfig,
    embedding: EmbeddingConfig,
    entities: EntitiesConfig,
}

impl ServiceFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            ocr: config.ocr.clone(),
            embedding: config.embedding.clone(),
            entities: config.entities.clone(),
        }
    }
}

impl ResourceFactory for ServiceFactory {
    fn text_extractor(&self) -> Result<Box<dyn TextExtractor>, ProcessError> {
        Ok(Box::new(PdfTextExtractor))
    }

    fn ocr_engine(&self) -> Result<Box<dyn OcrEngine>, ProcessError> {
        Ok(Box::new(HttpOcrEngine::new(&self.ocr)?))
    }

    fn embedder(&self) -> Result<Option<Box<dyn Embedder>>, ProcessError> {
        if !self.embedding.is_enabled() {
            return Ok(None);
        }
        Ok(Some(Box::new(OpenAiEmbedder::new(&self.embedding)?)))
    }

    fn entity_extractor(&self) -> Result<Option<Box<dyn EntityExtractor>>, ProcessError> {
        if !self.entities.enabled {
            return Ok(None);
        }
        Ok(Some(Box::new(ChatEntityExtractor::new(&self.entities)?)))
    }
}

/// One worker's long-lived collaborator handles, created lazily.
pub struct WorkerResources<'f> {
    factory: &'f dyn ResourceFactory,
    text: Option<Box<dyn TextExtractor>>,
    ocr: Option<Box<dyn OcrEngine>>,
    embedder: Option<Result<Option<Box<dyn Embedder>>, String>>,
    entities: Option<Result<Option<Box<dyn EntityExtractor>>, String>>,
}

impl<'f> WorkerResources<'f> {
    pub fn new(factory: &'f dyn ResourceFactory) -> Self {
        Self {
            factory,
            text: None,
            ocr: None,
            embedder: None,
            entities: None,
        }
    }

    pub fn text_extractor(&mut self) -> Result<&dyn TextExtractor, ProcessError> {
        let extractor = match self.text.take() {
            Some(e) => e,
            None => self.factory.text_extractor()?,
        };
        Ok(&**self.text.insert(extractor))
    }

    pub fn ocr(&mut self) -> Result<&dyn OcrEngine, ProcessError> {
        let engine = match self.ocr.take() {
            Some(e) => e,
            None => {
                debug!("creating OCR engine for this worker");
                self.factory.ocr_engine()?
            }
        };
        Ok(&**self.ocr.insert(engine))
    }

    /// Enrich records with whatever collaborators are enabled. A
    /// collaborator that cannot be built is reported on every file, like an
    /// enrichment failure.
    pub fn enrich(&mut self, records: &mut [ChunkRecord]) -> Vec<String> {
        let factory = self.factory;
        let embedder = self
            .embedder
            .get_or_insert_with(|| factory.embedder().map_err(|e| e.to_string()));
        let entities = self
            .entities
            .get_or_insert_with(|| factory.entity_extractor().map_err(|e| e.to_string()));

        let mut warnings = Vec::new();
        let embedder = match embedder {
            Ok(slot) => slot.as_deref(),
            Err(msg) => {
                warnings.push(format!("embedding unavailable: {}", msg));
                None
            }
        };
        let entities = match entities {
            Ok(slot) => slot.as_deref(),
            Err(msg) => {
                warnings.push(format!("entity extraction unavailable: {}", msg));
                None
            }
        };
        warnings.extend(enrich_records(records, embedder, entities));
        warnings
    }
}

/// Everything a processor needs to know about the file it is handling.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub path: PathBuf,
    pub kind: FileKind,
    pub hash: String,
    pub classification: Option<ClassificationResult>,
}

#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub config: &'a Config,
    pub batch_id: &'a str,
    pub enrich: bool,
}

#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub records: Vec<ChunkRecord>,
    /// Full extracted document as markdown.
    pub markdown: String,
    pub page_count: Option<usize>,
    pub confidence: f64,
    pub warnings: Vec<String>,
}

fn source_info(path: &Path) -> SourceInfo {
    SourceInfo {
        file_path: path.display().to_string(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_type: file_type_tag(path),
        mime_type: mime_type(path).to_string(),
    }
}

fn type_label(job: &FileJob, processor: Processor) -> &'static str {
    match (job.kind, processor) {
        (FileKind::Pdf, Processor::Ocr) => "pdf_scanned",
        (FileKind::Pdf, _) => "pdf_digital",
        (FileKind::Image, _) => "image",
        (FileKind::Docx, _) => "docx",
        (FileKind::Xlsx, _) => "xlsx",
        (FileKind::Csv, _) => "csv",
    }
}

fn template(job: &FileJob, processor: Processor, ctx: &HandlerContext, confidence: f64) -> RecordTemplate {
    RecordTemplate {
        doc_id: doc_id(&job.hash).to_string(),
        source: source_info(&job.path),
        metadata: ChunkMetadata {
            schema_version: ctx.config.metadata.schema_version.clone(),
            file_type: type_label(job, processor).to_string(),
            hash_input_sha256: job.hash.clone(),
            processor: processor.name().to_string(),
            processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            batch_id: ctx.batch_id.to_string(),
            confidence_score: confidence,
            warnings: Vec::new(),
        },
    }
}

/// Run one processor over one file, then enrich the resulting records.
pub fn run_processor(
    processor: Processor,
    job: &FileJob,
    ctx: &HandlerContext,
    resources: &mut WorkerResources,
) -> Result<HandlerOutput, ProcessError> {
    let mut output = match processor {
        Processor::PdfText => process_pdf_text(job, ctx, resources)?,
        Processor::Ocr => process_ocr(job, ctx, resources)?,
        Processor::Docx => process_docx(job, ctx)?,
        Processor::Tabular => process_tabular(job, ctx)?,
    };
    if ctx.enrich {
        let extra = resources.enrich(&mut output.records);
        output.warnings.extend(extra);
    }
    for record in &mut output.records {
        record.metadata.warnings = output.warnings.clone();
    }
    Ok(output)
}

fn process_pdf_text(
    job: &FileJob,
    ctx: &HandlerContext,
    resources: &mut WorkerResources,
) -> Result<HandlerOutput, ProcessError> {
    let extracted = resources.text_extractor()?.extract(&job.path)?;
    let page_count = extracted
        .page_count
        .or_else(|| job.classification.as_ref().map(|c| c.total_pages));

    let mut warnings = Vec::new();
    let chars = extracted.text.trim().chars().count();
    if chars == 0 {
        warnings.push("no text extracted".to_string());
    } else if let Some(pages) = page_count.filter(|p| *p > 0) {
        let per_page = chars / pages;
        if per_page < LOW_YIELD_CHARS_PER_PAGE {
            warnings.push(format!("low text yield: {} chars/page", per_page));
        }
    }

    let tpl = template(job, Processor::PdfText, ctx, DIGITAL_CONFIDENCE);
    let records = chunk_document(&tpl, &extracted.text, &ctx.config.chunking);
    Ok(HandlerOutput {
        records,
        markdown: extracted.text,
        page_count,
        confidence: DIGITAL_CONFIDENCE,
        warnings,
    })
}

fn process_ocr(
    job: &FileJob,
    ctx: &HandlerContext,
    resources: &mut WorkerResources,
) -> Result<HandlerOutput, ProcessError> {
    let document = resources
        .ocr()?
        .recognize(std::slice::from_ref(&job.path))?
        .into_iter()
        .next()
        .ok_or_else(|| ProcessError::unclassified("OCR returned no result"))?;
    let text = document.full_text();

    let mut warnings = Vec::new();
    if text.is_empty() {
        warnings.push("OCR produced no text".to_string());
    }

    let tpl = template(job, Processor::Ocr, ctx, OCR_CONFIDENCE);
    let mut records = chunk_document(&tpl, &text, &ctx.config.chunking);
    assign_pages(&mut records, &document);

    let page_count = if document.pages.is_empty() {
        job.classification.as_ref().map(|c| c.total_pages)
    } else {
        Some(document.pages.len())
    };
    Ok(HandlerOutput {
        records,
        markdown: text,
        page_count,
        confidence: OCR_CONFIDENCE,
        warnings,
    })
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Set each chunk's page to the OCR page its opening text came from.
///
/// Matching runs on whitespace-normalized text, since the chunker may
/// rejoin sentences and paragraphs with different separators.
fn assign_pages(records: &mut [ChunkRecord], document: &OcrDocument) {
    let mut joined = String::new();
    // Byte offset at which each non-empty page starts in `joined`.
    let mut starts = Vec::new();
    for page in &document.pages {
        let text = normalize_ws(&page.text);
        if text.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push(' ');
        }
        starts.push((joined.len(), page.page));
        joined.push_str(&text);
    }

    let mut cursor = 0;
    for record in records {
        let needle: String = normalize_ws(&record.text).chars().take(PAGE_MATCH_CHARS).collect();
        if needle.is_empty() {
            continue;
        }
        if let Some(found) = joined[cursor..].find(needle.as_str()) {
            let at = cursor + found;
            cursor = at;
            record.attrs.page = starts
                .iter()
                .take_while(|(start, _)| *start <= at)
                .last()
                .map(|(_, page)| *page);
        }
    }
}

fn process_docx(job: &FileJob, ctx: &HandlerContext) -> Result<HandlerOutput, ProcessError> {
    let text = extract_docx_file(&job.path)?;
    let mut warnings = Vec::new();
    if text.is_empty() {
        warnings.push("no text extracted".to_string());
    }
    let tpl = template(job, Processor::Docx, ctx, DIGITAL_CONFIDENCE);
    let records = chunk_document(&tpl, &text, &ctx.config.chunking);
    Ok(HandlerOutput {
        records,
        markdown: text,
        page_count: None,
        confidence: DIGITAL_CONFIDENCE,
        warnings,
    })
}

fn process_tabular(job: &FileJob, ctx: &HandlerContext) -> Result<HandlerOutput, ProcessError> {
    let sheets = match job.kind {
        FileKind::Csv => vec![read_csv(&job.path)?],
        _ => read_workbook(&job.path, ctx.config.tables.skip_hidden_sheets)?,
    };
    let mut warnings = Vec::new();
    if sheets.iter().all(|s| s.rows.is_empty()) {
        warnings.push("no rows found".to_string());
    }
    let tpl = template(job, Processor::Tabular, ctx, DIGITAL_CONFIDENCE);
    let records = chunk_sheets(&tpl, &sheets, &ctx.config.tables);
    let markdown = records
        .iter()
        .map(|r| r.text.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(HandlerOutput {
        records,
        markdown,
        page_count: None,
        confidence: DIGITAL_CONFIDENCE,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::models::Confidence;
    use crate::ocr::OcrPage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn classification(doc_class: DocClass) -> ClassificationResult {
        ClassificationResult {
            doc_class,
            percent_digital: 1.0,
            confidence: Confidence::High,
            total_pages: 2,
            digital_pages: 2,
            allowed: doc_class != DocClass::Rejected,
            reason: "r".into(),
            image_detection: None,
        }
    }

    #[test]
    fn test_route() {
        let digital = classification(DocClass::Digital);
        let scanned = classification(DocClass::Scanned);
        let rejected = classification(DocClass::Rejected);
        assert_eq!(route(FileKind::Pdf, Some(&digital)).unwrap(), Processor::PdfText);
        assert_eq!(route(FileKind::Pdf, Some(&scanned)).unwrap(), Processor::Ocr);
        assert!(route(FileKind::Pdf, Some(&rejected)).is_err());
        assert!(route(FileKind::Pdf, None).is_err());
        assert_eq!(route(FileKind::Image, None).unwrap(), Processor::Ocr);
        assert_eq!(route(FileKind::Csv, None).unwrap(), Processor::Tabular);
    }

    struct PagedOcr;

    impl OcrEngine for PagedOcr {
        fn recognize(&self, paths: &[PathBuf]) -> Result<Vec<OcrDocument>, ProcessError> {
            Ok(paths
                .iter()
                .map(|_| OcrDocument {
                    name: "scan.png".into(),
                    pages: (1..=3)
                        .map(|p| OcrPage {
                            page: p,
                            text: format!("Page {} opening words.\n\nPage {} closing words.", p, p),
                        })
                        .collect(),
                })
                .collect())
        }
    }

    struct CountingFactory {
        ocr_built: AtomicUsize,
    }

    impl ResourceFactory for CountingFactory {
        fn text_extractor(&self) -> Result<Box<dyn TextExtractor>, ProcessError> {
            Ok(Box::new(PdfTextExtractor))
        }
        fn ocr_engine(&self) -> Result<Box<dyn OcrEngine>, ProcessError> {
            self.ocr_built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(PagedOcr))
        }
        fn embedder(&self) -> Result<Option<Box<dyn Embedder>>, ProcessError> {
            Ok(None)
        }
        fn entity_extractor(&self) -> Result<Option<Box<dyn EntityExtractor>>, ProcessError> {
            Err(ProcessError::permanent("OPENAI_API_KEY environment variable not set"))
        }
    }

    #[test]
    fn test_ocr_engine_built_once_per_worker_and_pages_assigned() {
        let config = parse_config(
            "[storage]\nbase_dir = \"/tmp/x\"\n[chunking]\ntoken_target = 4\ntoken_min = 1\ntoken_max = 6\n",
        )
        .unwrap();
        let factory = CountingFactory {
            ocr_built: AtomicUsize::new(0),
        };
        let mut resources = WorkerResources::new(&factory);
        let ctx = HandlerContext {
            config: &config,
            batch_id: "20260101_000000_abcd",
            enrich: true,
        };
        let job = FileJob {
            path: PathBuf::from("/in/scan.png"),
            kind: FileKind::Image,
            hash: "ab".repeat(32),
            classification: None,
        };

        let first = run_processor(Processor::Ocr, &job, &ctx, &mut resources).unwrap();
        let second = run_processor(Processor::Ocr, &job, &ctx, &mut resources).unwrap();
        assert_eq!(factory.ocr_built.load(Ordering::SeqCst), 1);

        assert_eq!(first.records.len(), 6);
        let pages: Vec<Option<u32>> = first.records.iter().map(|r| r.attrs.page).collect();
        assert_eq!(pages, vec![Some(1), Some(1), Some(2), Some(2), Some(3), Some(3)]);
        assert_eq!(first.page_count, Some(3));
        assert_eq!(first.records[0].metadata.confidence_score, 0.85);
        assert_eq!(first.records[0].metadata.file_type, "image");
        assert_eq!(first.records[0].id, format!("{}_0000", "ab".repeat(8)));
        // The entity extractor failed to build: a warning, not an error.
        assert!(second.warnings.iter().any(|w| w.contains("entity extraction unavailable")));
        assert_eq!(second.records[0].metadata.warnings, second.warnings);
    }

    #[test]
    fn test_pages_found_when_line_breaks_are_rejoined() {
        let config = parse_config(
            "[storage]\nbase_dir = \"/tmp/x\"\n[chunking]\ntoken_target = 4\ntoken_min = 1\ntoken_max = 6\n",
        )
        .unwrap();
        let ctx = HandlerContext {
            config: &config,
            batch_id: "b",
            enrich: false,
        };
        let job = FileJob {
            path: PathBuf::from("/in/scan.png"),
            kind: FileKind::Image,
            hash: "ef".repeat(32),
            classification: None,
        };
        let document = OcrDocument {
            name: "scan.png".into(),
            pages: vec![
                OcrPage {
                    page: 1,
                    text: "The first clause runs\nacross a wrapped line\nand ends here.".into(),
                },
                OcrPage {
                    page: 2,
                    text: "Second page   starts\n  with odd\tspacing inside it.".into(),
                },
            ],
        };

        let tpl = template(&job, Processor::Ocr, &ctx, OCR_CONFIDENCE);
        let mut records = chunk_document(&tpl, &document.full_text(), &config.chunking);
        assign_pages(&mut records, &document);

        assert!(records.len() >= 2);
        let pages: Vec<Option<u32>> = records.iter().map(|r| r.attrs.page).collect();
        assert!(pages.iter().all(|p| p.is_some()), "{:?}", pages);
        assert_eq!(pages.first(), Some(&Some(1)));
        assert_eq!(pages.last(), Some(&Some(2)));
        assert!(pages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_tabular_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts.csv");
        std::fs::write(&path, "name,qty\nbolt,4\nnut,9\n,\nregion,owner\nnorth,1\n").unwrap();
        let config = parse_config("[storage]\nbase_dir = \"/tmp/x\"\n").unwrap();
        let ctx = HandlerContext {
            config: &config,
            batch_id: "b",
            enrich: false,
        };
        let job = FileJob {
            path,
            kind: FileKind::Csv,
            hash: "cd".repeat(32),
            classification: None,
        };
        let factory = CountingFactory {
            ocr_built: AtomicUsize::new(0),
        };
        let mut resources = WorkerResources::new(&factory);
        let out = run_processor(Processor::Tabular, &job, &ctx, &mut resources).unwrap();
        assert_eq!(out.records.len(), 2);
        assert!(out.records.iter().all(|r| r.attrs.table));
        assert_eq!(out.records[0].attrs.sheet.as_deref(), Some("parts"));
        assert!(out.records[0].text.starts_with("## Sheet: parts"));
        assert_eq!(out.records[1].attrs.row_span, Some((5, 6)));
        assert_eq!(out.records[1].chunk_index, 1);
    }
}
