//! Token-bounded text chunker.
//!
//! Splits extracted document text into retrieval units. Paragraphs
//! (`\n\n`-separated) are accumulated greedily: the buffer is flushed when
//! the next unit would push it past `token_max`, and proactively as soon as
//! it reaches `token_target`. Text with fewer than
//! `sentence_fallback_paragraphs` paragraphs is treated as continuous prose
//! and split on sentence boundaries instead.
//!
//! Units that alone exceed `token_max` are broken down further
//! (paragraph → sentences → word windows), so no chunk ever exceeds
//! `token_max`. A short trailing chunk (below `token_min`) is folded into
//! its predecessor when the result still fits.
//!
//! Token counts are whitespace-split word counts. This is an approximation
//! of a subword tokenizer and all thresholds are expressed in these units.

use crate::config::ChunkingConfig;
use crate::models::{chunk_id, ChunkAttrs, ChunkMetadata, ChunkRecord, SourceInfo};

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

/// A chunk before it is stamped with document metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub token_count: usize,
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

struct Unit<'a> {
    text: std::borrow::Cow<'a, str>,
    sep: &'static str,
    tokens: usize,
}

/// Split text into chunks. Empty or whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let paragraphs: Vec<&str> = text
        .split(PARAGRAPH_SEP)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let max = config.token_max.max(1);
    let mut units = Vec::new();
    if paragraphs.len() < config.sentence_fallback_paragraphs {
        for sentence in split_sentences(text) {
            push_bounded(&mut units, sentence, SENTENCE_SEP, max);
        }
    } else {
        for para in paragraphs {
            if count_tokens(para) <= max {
                push_unit(&mut units, para.into(), PARAGRAPH_SEP);
                continue;
            }
            let mut sep = PARAGRAPH_SEP;
            for sentence in split_sentences(para) {
                push_bounded(&mut units, sentence, sep, max);
                sep = SENTENCE_SEP;
            }
        }
    }

    let mut pieces: Vec<(String, usize, &'static str)> = Vec::new();
    let mut buf = String::new();
    let mut buf_tokens = 0usize;
    let mut buf_sep = PARAGRAPH_SEP;

    for unit in units {
        if !buf.is_empty() && buf_tokens + unit.tokens > max {
            pieces.push((std::mem::take(&mut buf), buf_tokens, buf_sep));
            buf_tokens = 0;
        }
        if buf.is_empty() {
            buf_sep = unit.sep;
        } else {
            buf.push_str(unit.sep);
        }
        buf.push_str(&unit.text);
        buf_tokens += unit.tokens;

        if buf_tokens >= config.token_target {
            pieces.push((std::mem::take(&mut buf), buf_tokens, buf_sep));
            buf_tokens = 0;
        }
    }
    if !buf.is_empty() {
        pieces.push((buf, buf_tokens, buf_sep));
    }

    // Fold a runt tail into its predecessor.
    if pieces.len() >= 2 {
        let n = pieces.len();
        let (last_tokens, last_sep) = (pieces[n - 1].1, pieces[n - 1].2);
        let prev_tokens = pieces[n - 2].1;
        if last_tokens < config.token_min && prev_tokens + last_tokens <= max {
            if let Some((last_text, _, _)) = pieces.pop() {
                if let Some(prev) = pieces.last_mut() {
                    prev.0.push_str(last_sep);
                    prev.0.push_str(&last_text);
                    prev.1 += last_tokens;
                }
            }
        }
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, (text, token_count, _))| TextChunk {
            index,
            text,
            token_count,
        })
        .collect()
}

fn push_unit<'a>(units: &mut Vec<Unit<'a>>, text: std::borrow::Cow<'a, str>, sep: &'static str) {
    let tokens = count_tokens(&text);
    if tokens > 0 {
        units.push(Unit { text, sep, tokens });
    }
}

/// Push a sentence, hard-splitting it into word windows if it is too long.
fn push_bounded<'a>(units: &mut Vec<Unit<'a>>, sentence: &'a str, sep: &'static str, max: usize) {
    if count_tokens(sentence) <= max {
        push_unit(units, sentence.into(), sep);
        return;
    }
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mut sep = sep;
    for window in words.chunks(max) {
        push_unit(units, window.join(" ").into(), sep);
        sep = SENTENCE_SEP;
    }
}

/// Split on whitespace that follows `.`, `!` or `?`.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut after_terminal = false;
    for (i, c) in text.char_indices() {
        if after_terminal && c.is_whitespace() {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = i;
        }
        after_terminal = matches!(c, '.' | '!' | '?');
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Document-level fields shared by every record of one file.
#[derive(Debug, Clone)]
pub struct RecordTemplate {
    pub doc_id: String,
    pub source: SourceInfo,
    pub metadata: ChunkMetadata,
}

impl RecordTemplate {
    pub fn record(&self, index: usize, text: String, attrs: ChunkAttrs) -> ChunkRecord {
        ChunkRecord {
            id: chunk_id(&self.doc_id, index),
            doc_id: self.doc_id.clone(),
            chunk_index: index,
            text,
            attrs,
            source: self.source.clone(),
            metadata: self.metadata.clone(),
            embedding: None,
            entities: None,
        }
    }
}

/// Chunk `text` and stamp every chunk with the document's metadata.
pub fn chunk_document(
    template: &RecordTemplate,
    text: &str,
    config: &ChunkingConfig,
) -> Vec<ChunkRecord> {
    chunk_text(text, config)
        .into_iter()
        .map(|c| {
            let attrs = ChunkAttrs {
                token_count: c.token_count,
                ..Default::default()
            };
            template.record(c.index, c.text, attrs)
        })
        .collect()
}
