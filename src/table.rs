//! Structural segmentation of spreadsheet and CSV grids.
//!
//! Instead of cutting on size, a sheet is split where its structure
//! changes:
//!
//! | Boundary | Fires when |
//! |----------|------------|
//! | blank row | populated fraction < `1 - blank_row_threshold` |
//! | schema change | populated-column symmetric difference / width > `schema_change_threshold` |
//! | header | non-numeric share of populated cells >= `header_detection_threshold` |
//! | row cap | segment reaches `max_rows_per_chunk` rows |
//!
//! A blank row or a schema change forgets the current header; a header row is
//! carried into every following segment until the next blank row, including
//! across row-cap splits. Each segment becomes one markdown table chunk.

use crate::chunk::{count_tokens, RecordTemplate};
use crate::config::TableConfig;
use crate::models::{ChunkAttrs, ChunkRecord, TableBoundary};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// Interpret a raw text field (CSV) as a typed cell.
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                Cell::Number(n)
            } else {
                Cell::Text(trimmed.to_string())
            }
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Cell::Number(_) | Cell::Bool(_))
    }

    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

/// One worksheet (or a whole CSV file) as a rectangular grid.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    /// Zero-based sheet row of `rows[0]`.
    pub first_row: usize,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    pub header: Option<Vec<Cell>>,
    pub rows: Vec<Vec<Cell>>,
    /// Half-open row range covered by `rows`, in sheet coordinates.
    pub start_row: usize,
    pub end_row: usize,
    /// What caused this segment to start.
    pub boundary: TableBoundary,
}

struct Segmenter<'a> {
    config: &'a TableConfig,
    segments: Vec<TableSegment>,
    rows: Vec<Vec<Cell>>,
    start_row: usize,
    end_row: usize,
    header: Option<Vec<Cell>>,
    header_used: bool,
    next_boundary: TableBoundary,
}

impl Segmenter<'_> {
    /// Close the current segment. A header with no rows still becomes a
    /// segment if no earlier segment carried it, so no text is dropped.
    fn flush(&mut self, next: TableBoundary) {
        let header_pending = self.header.is_some() && !self.header_used;
        if !self.rows.is_empty() || header_pending {
            self.segments.push(TableSegment {
                header: self.header.clone(),
                rows: std::mem::take(&mut self.rows),
                start_row: self.start_row,
                end_row: self.end_row,
                boundary: self.next_boundary,
            });
            self.header_used = self.header.is_some();
            self.next_boundary = next;
        }
    }

    fn push_row(&mut self, row: Vec<Cell>, index: usize) {
        if self.rows.is_empty() {
            self.start_row = index;
        }
        self.rows.push(row);
        self.end_row = index + 1;
    }
}

/// Split a grid into logical tables.
pub fn detect_table_boundaries(sheet: &Sheet, config: &TableConfig) -> Vec<TableSegment> {
    let width = sheet.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut seg = Segmenter {
        config,
        segments: Vec::new(),
        rows: Vec::new(),
        start_row: sheet.first_row,
        end_row: sheet.first_row,
        header: None,
        header_used: false,
        next_boundary: TableBoundary::Start,
    };
    if width == 0 {
        return seg.segments;
    }
    let mut last_schema: Option<Vec<bool>> = None;

    for (offset, raw) in sheet.rows.iter().enumerate() {
        let index = sheet.first_row + offset;
        let mut row = raw.clone();
        row.resize(width, Cell::Empty);

        let populated: Vec<bool> = row.iter().map(|c| !c.is_empty()).collect();
        let non_empty = populated.iter().filter(|p| **p).count();

        if (non_empty as f64 / width as f64) < 1.0 - seg.config.blank_row_threshold {
            seg.flush(TableBoundary::BlankRow);
            seg.header = None;
            seg.header_used = false;
            last_schema = None;
            if non_empty == 0 {
                continue;
            }
        }

        let non_numeric = row
            .iter()
            .filter(|c| !c.is_empty() && !c.is_numeric())
            .count();
        let is_header = non_empty > 0
            && non_numeric as f64 / non_empty as f64 >= seg.config.header_detection_threshold;

        // A header row starts its own table below, so it never counts as a
        // schema change.
        if let Some(last) = &last_schema {
            if !seg.rows.is_empty() && !is_header {
                let diff = last.iter().zip(&populated).filter(|(a, b)| a != b).count();
                if diff as f64 / width as f64 > seg.config.schema_change_threshold {
                    seg.flush(TableBoundary::SchemaChange);
                    seg.header = None;
                    seg.header_used = false;
                }
            }
        }
        last_schema = Some(populated);

        if is_header {
            seg.flush(TableBoundary::Header);
            seg.header = Some(row);
            seg.header_used = false;
            seg.start_row = index + 1;
            seg.end_row = index + 1;
            continue;
        }

        seg.push_row(row, index);
        if seg.rows.len() >= seg.config.max_rows_per_chunk {
            seg.flush(TableBoundary::RowCap);
        }
    }
    seg.flush(TableBoundary::Start);
    seg.segments
}

fn escape(cell: &Cell) -> String {
    cell.display().replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// Column range that holds any value within the segment.
fn used_columns(segment: &TableSegment) -> Option<(usize, usize)> {
    let mut range: Option<(usize, usize)> = None;
    for row in segment.header.iter().chain(segment.rows.iter()) {
        for (i, cell) in row.iter().enumerate() {
            if !cell.is_empty() {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(i), hi.max(i)),
                    None => (i, i),
                });
            }
        }
    }
    range
}

/// Render a segment as a markdown table under a sheet heading.
pub fn render_markdown(sheet_name: &str, segment: &TableSegment) -> String {
    let mut out = format!("## Sheet: {}\n\n", sheet_name);
    let Some((lo, hi)) = used_columns(segment) else {
        return out;
    };
    let line = |row: &[Cell]| {
        let cells: Vec<String> = (lo..=hi)
            .map(|i| row.get(i).map(escape).unwrap_or_default())
            .collect();
        format!("| {} |\n", cells.join(" | "))
    };

    let mut rows = segment.header.iter().chain(segment.rows.iter());
    if let Some(first) = rows.next() {
        out.push_str(&line(first.as_slice()));
        out.push_str(&format!("|{}\n", " --- |".repeat(hi - lo + 1)));
    }
    for row in rows {
        out.push_str(&line(row.as_slice()));
    }
    out
}

/// Segment every sheet and turn each segment into a table chunk record.
/// Indices run contiguously across sheets.
pub fn chunk_sheets(
    template: &RecordTemplate,
    sheets: &[Sheet],
    config: &TableConfig,
) -> Vec<ChunkRecord> {
    let mut records = Vec::new();
    for sheet in sheets {
        for segment in detect_table_boundaries(sheet, config) {
            let text = render_markdown(&sheet.name, &segment);
            let n_cols = used_columns(&segment).map(|(lo, hi)| hi - lo + 1).unwrap_or(0);
            let attrs = ChunkAttrs {
                token_count: count_tokens(&text),
                table: true,
                sheet: Some(sheet.name.clone()),
                row_span: Some((segment.start_row, segment.end_row)),
                n_rows: Some(segment.rows.len()),
                n_cols: Some(n_cols),
                has_header: Some(segment.header.is_some()),
                boundary: Some(segment.boundary),
                ..Default::default()
            };
            records.push(template.record(records.len(), text, attrs));
        }
    }
    records
}
