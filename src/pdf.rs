//! `lopdf`-backed page inspection.
//!
//! Provides the classifier with per-page text presence, page size
//! (`/MediaBox`, inherited through `/Parent`) and image placements. Drawn
//! image area is recovered by replaying the page content stream's graphics
//! state (`q`, `Q`, `cm`) up to each `Do` of an image XObject.

use anyhow::{Context, Result};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::path::Path;

use crate::classify::{ImagePlacement, PageImages, PageSource};

/// Guards `/Parent` walks against reference cycles in malformed files.
const MAX_INHERIT_DEPTH: usize = 32;

type Matrix = [f64; 6];
const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

pub struct PdfPages {
    doc: Document,
    /// `(page number, page object id)` in page order.
    pages: Vec<(u32, ObjectId)>,
}

impl PdfPages {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = Document::load(path)
            .with_context(|| format!("corrupted or unreadable PDF: {}", path.display()))?;
        Ok(Self::from_document(doc))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).context("corrupted or unreadable PDF")?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: Document) -> Self {
        let pages = doc.get_pages().into_iter().collect();
        Self { doc, pages }
    }

    fn page_id(&self, index: usize) -> Result<(u32, ObjectId)> {
        self.pages
            .get(index)
            .copied()
            .with_context(|| format!("page index {} out of range", index))
    }

    /// Text of one page via lopdf's own extractor.
    pub fn page_text(&self, index: usize) -> Result<String> {
        let (number, _) = self.page_id(index)?;
        Ok(self.doc.extract_text(&[number])?)
    }
}

impl PageSource for PdfPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_has_text(&self, index: usize) -> Result<bool> {
        Ok(self.page_text(index)?.chars().any(char::is_alphanumeric))
    }

    fn page_images(&self, index: usize) -> Result<PageImages> {
        let (_, page_id) = self.page_id(index)?;
        let page_size = media_box(&self.doc, page_id);
        let xobjects = image_xobjects(&self.doc, page_id);
        if xobjects.is_empty() {
            return Ok(PageImages {
                page_size,
                images: Vec::new(),
            });
        }

        let images = match placed_images(&self.doc, page_id, &xobjects) {
            Ok(placed) => placed,
            Err(_) => xobjects
                .values()
                .map(|&(w, h)| ImagePlacement {
                    pixel_width: w,
                    pixel_height: h,
                    drawn_area: None,
                })
                .collect(),
        };
        Ok(PageImages { page_size, images })
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look up a page attribute, following `/Parent` for inheritable keys.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict: &Dictionary = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f64, f64)> {
    let arr = inherited(doc, page_id, b"MediaBox")?.as_array().ok()?;
    let v: Vec<f64> = arr
        .iter()
        .filter_map(|o| resolve(doc, o).and_then(number))
        .collect();
    if v.len() != 4 {
        return None;
    }
    Some(((v[2] - v[0]).abs(), (v[3] - v[1]).abs()))
}

/// Image XObjects named in the page resources, with pixel dimensions.
fn image_xobjects(doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, (u32, u32)> {
    let mut out = HashMap::new();
    let Some(resources) = inherited(doc, page_id, b"Resources").and_then(|r| r.as_dict().ok())
    else {
        return out;
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|x| resolve(doc, x))
        .and_then(|x| x.as_dict().ok())
    else {
        return out;
    };
    for (name, obj) in xobjects.iter() {
        let Some(stream) = resolve(doc, obj).and_then(|o| o.as_stream().ok()) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|s| s.as_name().ok())
            .is_some_and(|s| s == b"Image");
        if !is_image {
            continue;
        }
        let dim = |key: &[u8]| {
            stream
                .dict
                .get(key)
                .ok()
                .and_then(|o| resolve(doc, o))
                .and_then(|o| o.as_i64().ok())
                .and_then(|v| u32::try_from(v).ok())
        };
        if let (Some(w), Some(h)) = (dim(b"Width"), dim(b"Height")) {
            out.insert(name.clone(), (w, h));
        }
    }
    out
}

fn multiply(m: &Matrix, ctm: &Matrix) -> Matrix {
    [
        m[0] * ctm[0] + m[1] * ctm[2],
        m[0] * ctm[1] + m[1] * ctm[3],
        m[2] * ctm[0] + m[3] * ctm[2],
        m[2] * ctm[1] + m[3] * ctm[3],
        m[4] * ctm[0] + m[5] * ctm[2] + ctm[4],
        m[4] * ctm[1] + m[5] * ctm[3] + ctm[5],
    ]
}

/// Replay the content stream and record the area of every drawn image.
/// The unit square an image is painted into maps to a parallelogram whose
/// area is the determinant of the current matrix.
fn placed_images(
    doc: &Document,
    page_id: ObjectId,
    xobjects: &HashMap<Vec<u8>, (u32, u32)>,
) -> Result<Vec<ImagePlacement>> {
    let bytes = doc.get_page_content(page_id)?;
    let content = Content::decode(&bytes)?;

    let mut ctm = IDENTITY;
    let mut stack: Vec<Matrix> = Vec::new();
    let mut placed = Vec::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "q" => stack.push(ctm),
            "Q" => ctm = stack.pop().unwrap_or(IDENTITY),
            "cm" if op.operands.len() == 6 => {
                let m: Vec<f64> = op.operands.iter().filter_map(number).collect();
                if m.len() == 6 {
                    ctm = multiply(&[m[0], m[1], m[2], m[3], m[4], m[5]], &ctm);
                }
            }
            "Do" => {
                let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                    continue;
                };
                if let Some(&(w, h)) = xobjects.get(name) {
                    placed.push(ImagePlacement {
                        pixel_width: w,
                        pixel_height: h,
                        drawn_area: Some((ctm[0] * ctm[3] - ctm[1] * ctm[2]).abs()),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiply_scale_then_translate() {
        let scale = [612.0, 0.0, 0.0, 792.0, 0.0, 0.0];
        let translate = [1.0, 0.0, 0.0, 1.0, 10.0, 20.0];
        let m = multiply(&scale, &translate);
        assert_eq!(m, [612.0, 0.0, 0.0, 792.0, 10.0, 20.0]);
        let area = (m[0] * m[3] - m[1] * m[2]).abs();
        assert_eq!(area, 612.0 * 792.0);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(PdfPages::from_bytes(b"not a pdf at all").is_err());
    }
}
