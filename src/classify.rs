//! Digital-vs-scanned routing for paged documents.
//!
//! ```text
//! page count ──▶ over cap? ──yes──▶ rejected
//!                    │no
//!                    ▼
//!          pre-scan first N pages ──no text──▶ scanned (high)
//!                    │
//!                    ▼
//!          full text-layer scan ──▶ percent_digital, confidence tier
//!                    │ percent_digital >= image_check_min_digital
//!                    ▼
//!          stratified full-page-image sampling ──mostly scans──▶ scanned
//!                    │
//!                    ▼
//!          digital if percent_digital >= cutoff, else scanned
//! ```
//!
//! The algorithm runs over the [`PageSource`] trait; [`crate::pdf::PdfPages`]
//! is the production implementation.

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::config::ClassificationConfig;
use crate::models::{ClassificationResult, Confidence, DocClass, ImageSampling};
use crate::pdf::PdfPages;

/// Common page shapes (short side / long side) used when the page size is
/// unknown: US letter and ISO A-series.
const FALLBACK_PAGE_ASPECTS: &[f64] = &[8.5 / 11.0, std::f64::consts::FRAC_1_SQRT_2];

/// Read-only per-page view of a paged document.
pub trait PageSource {
    fn page_count(&self) -> usize;
    /// Whether the page carries an extractable text layer.
    fn page_has_text(&self, index: usize) -> Result<bool>;
    fn page_images(&self, index: usize) -> Result<PageImages>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageImages {
    /// Page width and height in user-space units.
    pub page_size: Option<(f64, f64)>,
    pub images: Vec<ImagePlacement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Area the image covers on the page, when the content stream could be
    /// interpreted.
    pub drawn_area: Option<f64>,
}

/// Open and classify a PDF. Fails only when the file cannot be parsed.
pub fn classify_file(path: &Path, config: &ClassificationConfig) -> Result<ClassificationResult> {
    let pages = PdfPages::open(path)?;
    Ok(classify(&pages, config))
}

fn rejected(total_pages: usize, reason: String) -> ClassificationResult {
    ClassificationResult {
        doc_class: DocClass::Rejected,
        percent_digital: 0.0,
        confidence: Confidence::High,
        total_pages,
        digital_pages: 0,
        allowed: false,
        reason,
        image_detection: None,
    }
}

fn has_text(source: &dyn PageSource, index: usize) -> bool {
    match source.page_has_text(index) {
        Ok(found) => found,
        Err(e) => {
            debug!(page = index, error = %e, "text extraction failed; counting page as non-digital");
            false
        }
    }
}

pub fn classify(source: &dyn PageSource, config: &ClassificationConfig) -> ClassificationResult {
    let total = source.page_count();
    if total == 0 {
        return rejected(0, "Document has no pages".to_string());
    }
    if total > config.max_pages_absolute {
        return rejected(
            total,
            format!(
                "Exceeds {}-page limit ({} pages)",
                config.max_pages_absolute, total
            ),
        );
    }

    let prescan = config.prescan_pages.min(total);
    let mut digital = (0..prescan).filter(|i| has_text(source, *i)).count();
    if prescan > 0 && (digital as f64 / prescan as f64) < config.prescan_min_digital {
        return ClassificationResult {
            doc_class: DocClass::Scanned,
            percent_digital: digital as f64 / prescan as f64,
            confidence: Confidence::High,
            total_pages: total,
            digital_pages: digital,
            allowed: true,
            reason: format!("pre-scan: no text layer in first {} pages", prescan),
            image_detection: None,
        };
    }

    digital += (prescan..total).filter(|i| has_text(source, *i)).count();
    let percent_digital = digital as f64 / total as f64;
    let confidence = if percent_digital < config.confidence_low_min
        || percent_digital > config.confidence_low_max
    {
        Confidence::High
    } else {
        Confidence::Low
    };

    let sampling = (percent_digital >= config.image_check_min_digital)
        .then(|| sample_full_page_images(source, total, config));
    let overridden = sampling
        .as_ref()
        .is_some_and(|s| s.scan_percentage > config.scan_override_ratio);

    let (doc_class, reason) = if overridden {
        let pct = sampling.as_ref().map(|s| s.scan_percentage).unwrap_or(0.0);
        (
            DocClass::Scanned,
            format!(
                "full-page images on {:.0}% of sampled pages; text layer is likely a prior OCR pass",
                pct * 100.0
            ),
        )
    } else if percent_digital >= config.percent_digital_cutoff {
        (
            DocClass::Digital,
            format!("{:.1}% of pages have extractable text", percent_digital * 100.0),
        )
    } else {
        (
            DocClass::Scanned,
            format!(
                "only {:.1}% of pages have extractable text",
                percent_digital * 100.0
            ),
        )
    };

    ClassificationResult {
        doc_class,
        percent_digital,
        confidence,
        total_pages: total,
        digital_pages: digital,
        allowed: true,
        reason,
        image_detection: sampling,
    }
}

/// Pick up to `samples_per_stratum` random pages from each of
/// `sample_strata` equal slices of the document, capped at `max_samples`.
/// Seeded so the same document always samples the same pages.
fn sample_pages(total: usize, config: &ClassificationConfig) -> Vec<usize> {
    let strata = config.sample_strata.min(total).max(1);
    let mut rng = fastrand::Rng::with_seed(config.sample_seed ^ total as u64);
    let mut picks = Vec::new();
    for s in 0..strata {
        let lo = s * total / strata;
        let hi = (s + 1) * total / strata;
        let mut pages: Vec<usize> = (lo..hi).collect();
        rng.shuffle(&mut pages);
        picks.extend(pages.into_iter().take(config.samples_per_stratum));
    }
    picks.truncate(config.max_samples);
    picks
}

fn sample_full_page_images(
    source: &dyn PageSource,
    total: usize,
    config: &ClassificationConfig,
) -> ImageSampling {
    let mut sampled = 0;
    let mut hits = 0;
    for page in sample_pages(total, config) {
        sampled += 1;
        let is_scan = match source.page_images(page) {
            Ok(images) => is_full_page_scan(&images, config),
            Err(e) => {
                debug!(page, error = %e, "image inspection failed");
                false
            }
        };
        if is_scan {
            hits += 1;
            if hits >= config.scan_hits_to_stop {
                break;
            }
        }
    }
    ImageSampling {
        has_full_page_scans: hits > 0,
        sampled_pages: sampled,
        scan_pages: hits,
        scan_percentage: if sampled == 0 {
            0.0
        } else {
            hits as f64 / sampled as f64
        },
    }
}

/// A page is a scan when one image covers most of it. Without placement
/// data, fall back to judging the image's pixel size and shape.
pub fn is_full_page_scan(page: &PageImages, config: &ClassificationConfig) -> bool {
    let page_area = page.page_size.map(|(w, h)| w * h).filter(|a| *a > 0.0);
    let mut measured = false;
    for image in &page.images {
        if let (Some(drawn), Some(area)) = (image.drawn_area, page_area) {
            measured = true;
            if drawn / area >= config.full_page_area_ratio {
                return true;
            }
        }
    }
    if measured {
        return false;
    }
    page.images
        .iter()
        .any(|image| looks_like_page_raster(image, page.page_size, config))
}

fn short_over_long(w: f64, h: f64) -> f64 {
    let (short, long) = if w < h { (w, h) } else { (h, w) };
    if long <= 0.0 {
        0.0
    } else {
        short / long
    }
}

fn looks_like_page_raster(
    image: &ImagePlacement,
    page_size: Option<(f64, f64)>,
    config: &ClassificationConfig,
) -> bool {
    if image.pixel_width.min(image.pixel_height) < config.min_scan_pixels {
        return false;
    }
    let aspect = short_over_long(image.pixel_width as f64, image.pixel_height as f64);
    match page_size {
        Some((w, h)) => (aspect - short_over_long(w, h)).abs() <= config.aspect_tolerance,
        None => FALLBACK_PAGE_ASPECTS
            .iter()
            .any(|a| (aspect - a).abs() <= config.aspect_tolerance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const LETTER: (f64, f64) = (612.0, 792.0);

    #[derive(Default)]
    struct FakeDoc {
        text: Vec<Option<bool>>,
        images: Vec<PageImages>,
        text_queries: RefCell<Vec<usize>>,
    }

    impl FakeDoc {
        fn with_text(text: Vec<bool>) -> Self {
            Self {
                images: vec![PageImages::default(); text.len()],
                text: text.into_iter().map(Some).collect(),
                ..Default::default()
            }
        }
    }

    impl PageSource for FakeDoc {
        fn page_count(&self) -> usize {
            self.text.len()
        }

        fn page_has_text(&self, index: usize) -> Result<bool> {
            self.text_queries.borrow_mut().push(index);
            self.text[index].ok_or_else(|| anyhow::anyhow!("broken font program"))
        }

        fn page_images(&self, index: usize) -> Result<PageImages> {
            Ok(self.images[index].clone())
        }
    }

    fn cfg() -> ClassificationConfig {
        ClassificationConfig::default()
    }

    fn full_page_image() -> PageImages {
        PageImages {
            page_size: Some(LETTER),
            images: vec![ImagePlacement {
                pixel_width: 2550,
                pixel_height: 3300,
                drawn_area: Some(LETTER.0 * LETTER.1),
            }],
        }
    }

    #[test]
    fn test_three_blank_pages_prescan_scanned() {
        let doc = FakeDoc::with_text(vec![false; 3]);
        let result = classify(&doc, &cfg());
        assert_eq!(result.doc_class, DocClass::Scanned);
        assert_eq!(result.confidence, Confidence::High);
        assert!(result.reason.starts_with("pre-scan"), "{}", result.reason);
        assert!(result.allowed);
    }

    #[test]
    fn test_prescan_skips_full_scan() {
        let mut text = vec![false; 3];
        text.extend(vec![true; 47]);
        let doc = FakeDoc::with_text(text);
        let result = classify(&doc, &cfg());
        assert_eq!(result.doc_class, DocClass::Scanned);
        assert_eq!(*doc.text_queries.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_nine_of_ten_digital_high() {
        let mut text = vec![true; 10];
        text[6] = false;
        let doc = FakeDoc::with_text(text);
        let result = classify(&doc, &cfg());
        assert_eq!(result.doc_class, DocClass::Digital);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.digital_pages, 9);
        assert!((result.percent_digital - 0.9).abs() < 1e-9);
        let sampling = result.image_detection.unwrap();
        assert_eq!(sampling.scan_pages, 0);
        assert!(sampling.sampled_pages > 0);
    }

    #[test]
    fn test_middle_band_is_low_confidence() {
        // 8 of 10 pages: digital, but inside the 0.65..0.85 band.
        let text = (0..10).map(|i| i < 8).collect();
        let result = classify(&FakeDoc::with_text(text), &cfg());
        assert_eq!(result.doc_class, DocClass::Digital);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn test_below_cutoff_is_scanned() {
        let text = (0..10).map(|i| i < 3 || i == 9).collect();
        let result = classify(&FakeDoc::with_text(text), &cfg());
        assert_eq!(result.doc_class, DocClass::Scanned);
        assert!(result.image_detection.is_none());
    }

    #[test]
    fn test_page_cap_rejects() {
        let doc = FakeDoc::with_text(vec![true; 201]);
        let result = classify(&doc, &cfg());
        assert_eq!(result.doc_class, DocClass::Rejected);
        assert!(!result.allowed);
        assert_eq!(result.reason, "Exceeds 200-page limit (201 pages)");
        assert!(doc.text_queries.borrow().is_empty());
    }

    #[test]
    fn test_zero_pages_rejected() {
        let result = classify(&FakeDoc::with_text(vec![]), &cfg());
        assert_eq!(result.doc_class, DocClass::Rejected);
        assert!(!result.allowed);
    }

    #[test]
    fn test_text_errors_count_as_non_digital() {
        let mut doc = FakeDoc::with_text(vec![true; 10]);
        doc.text[4] = None;
        doc.text[5] = None;
        let result = classify(&doc, &cfg());
        assert_eq!(result.digital_pages, 8);
    }

    #[test]
    fn test_full_page_images_override_to_scanned() {
        let mut doc = FakeDoc::with_text(vec![true; 20]);
        doc.images = vec![full_page_image(); 20];
        let result = classify(&doc, &cfg());
        assert_eq!(result.doc_class, DocClass::Scanned);
        let sampling = result.image_detection.unwrap();
        assert!(sampling.has_full_page_scans);
        // Stops at the third hit.
        assert_eq!(sampling.scan_pages, 3);
        assert_eq!(sampling.sampled_pages, 3);
    }

    #[test]
    fn test_small_images_do_not_override() {
        let mut doc = FakeDoc::with_text(vec![true; 20]);
        let logo = PageImages {
            page_size: Some(LETTER),
            images: vec![ImagePlacement {
                pixel_width: 300,
                pixel_height: 100,
                drawn_area: Some(150.0 * 50.0),
            }],
        };
        doc.images = vec![logo; 20];
        let result = classify(&doc, &cfg());
        assert_eq!(result.doc_class, DocClass::Digital);
        assert_eq!(result.image_detection.unwrap().scan_pages, 0);
    }

    #[test]
    fn test_pixel_fallback_without_placement() {
        let config = cfg();
        let unplaced = PageImages {
            page_size: Some(LETTER),
            images: vec![ImagePlacement {
                pixel_width: 2550,
                pixel_height: 3300,
                drawn_area: None,
            }],
        };
        assert!(is_full_page_scan(&unplaced, &config));

        let no_size = PageImages {
            page_size: None,
            images: vec![ImagePlacement {
                pixel_width: 2480,
                pixel_height: 3508,
                drawn_area: None,
            }],
        };
        assert!(is_full_page_scan(&no_size, &config));

        let banner = PageImages {
            page_size: Some(LETTER),
            images: vec![ImagePlacement {
                pixel_width: 4000,
                pixel_height: 1000,
                drawn_area: None,
            }],
        };
        assert!(!is_full_page_scan(&banner, &config));
    }

    #[test]
    fn test_sampling_is_deterministic_and_stratified() {
        let config = cfg();
        let a = sample_pages(100, &config);
        let b = sample_pages(100, &config);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        for (s, pair) in a.chunks(2).enumerate() {
            for page in pair {
                assert!((s * 20..(s + 1) * 20).contains(page));
            }
        }
        assert_eq!(sample_pages(3, &config).len(), 3);
    }
}
