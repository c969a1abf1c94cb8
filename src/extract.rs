//! Text and grid extraction for the formats handled in-process.
//!
//! PDFs with a text layer go through `pdf-extract` (page count from
//! `lopdf`), DOCX through `zip` + `quick-xml` with paragraph and heading
//! structure kept as markdown, XLSX through `calamine` and CSV through
//! `csv`. Scanned sources are not handled here; see [`crate::ocr`].

use calamine::Reader;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::error::{class_from_io_kind, ErrorClass, ProcessError};
use crate::table::{Cell, Sheet};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet read failed: {0}")]
    Spreadsheet(String),
    #[error("CSV read failed: {0}")]
    Csv(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ExtractError> for ProcessError {
    fn from(err: ExtractError) -> Self {
        let class = match &err {
            ExtractError::Io(e) => class_from_io_kind(e.kind()),
            _ => ErrorClass::Permanent,
        };
        ProcessError::new(class, err.to_string())
    }
}

/// Output of a text-layer extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: Option<usize>,
}

/// Direct text extraction from a document that already has a text layer.
pub trait TextExtractor: Send {
    fn extract(&self, path: &Path) -> Result<ExtractedText, ProcessError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedText, ProcessError> {
        let bytes = std::fs::read(path).map_err(ExtractError::from)?;
        let page_count = lopdf::Document::load_mem(&bytes)
            .ok()
            .map(|doc| doc.get_pages().len());
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(ExtractedText { text, page_count })
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

pub fn extract_docx_file(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    extract_docx(&bytes)
}

/// DOCX body as markdown-ish text: one paragraph per `\n\n` block, heading
/// styles rendered as `#` prefixes.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&xml)
}

fn heading_level(style: &[u8]) -> Option<usize> {
    let style = std::str::from_utf8(style).ok()?;
    if style.eq_ignore_ascii_case("title") {
        return Some(1);
    }
    let level = style
        .strip_prefix("Heading")
        .or_else(|| style.strip_prefix("heading"))?;
    level.trim().parse::<usize>().ok().map(|l| l.clamp(1, 6))
}

fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut level: Option<usize> = None;
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    current.clear();
                    level = None;
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" => {
                    level = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"val")
                        .and_then(|a| heading_level(&a.value));
                }
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(match level {
                            Some(l) => format!("{} {}", "#".repeat(l), text),
                            None => text.to_string(),
                        });
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs.join("\n\n"))
}

fn data_to_cell(data: &calamine::Data) -> Cell {
    match data {
        calamine::Data::Empty => Cell::Empty,
        calamine::Data::String(s) => {
            if s.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(s.clone())
            }
        }
        calamine::Data::Float(f) => Cell::Number(*f),
        calamine::Data::Int(i) => Cell::Number(*i as f64),
        calamine::Data::Bool(b) => Cell::Bool(*b),
        calamine::Data::DateTime(dt) => Cell::Text(dt.to_string()),
        calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => Cell::Text(s.clone()),
        calamine::Data::Error(e) => Cell::Text(format!("#{:?}", e)),
    }
}

/// Every (visible) worksheet of a workbook as a grid.
pub fn read_workbook(path: &Path, skip_hidden: bool) -> Result<Vec<Sheet>, ExtractError> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

    let names: Vec<String> = workbook
        .sheets_metadata()
        .iter()
        .filter(|s| !skip_hidden || s.visible == calamine::SheetVisible::Visible)
        .map(|s| s.name.clone())
        .take(XLSX_MAX_SHEETS)
        .collect();

    let mut sheets = Vec::new();
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractError::Spreadsheet(format!("sheet '{}': {}", name, e)))?;
        let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
        let rows = range
            .rows()
            .map(|row| row.iter().map(data_to_cell).collect())
            .collect();
        sheets.push(Sheet {
            name,
            first_row,
            rows,
        });
    }
    Ok(sheets)
}

/// A CSV file as a single grid named after the file stem. No header row is
/// assumed; header detection happens during segmentation.
pub fn read_csv(path: &Path) -> Result<Sheet, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows.push(record.iter().map(Cell::parse).collect());
    }
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    Ok(Sheet {
        name,
        first_row: 0,
        rows,
    })
}

fn csv_error(err: csv::Error) -> ExtractError {
    if err.is_io_error() {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => ExtractError::Io(io),
            other => ExtractError::Csv(format!("{:?}", other)),
        }
    } else {
        ExtractError::Csv(err.to_string())
    }
}
