//! End-to-end tests over real PDF, DOCX and XLSX-adjacent inputs.
//!
//! Covers classification of a digital vs. a text-less PDF, the digital PDF
//! and DOCX processors, OCR routing without a configured endpoint, and
//! chunk record contents.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn intake_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("intake");
    path
}

/// PDF with one page per entry; `None` pages have an empty content stream.
/// Builds body then xref with correct byte offsets so both lopdf and
/// pdf-extract can parse it.
fn pdf_with_pages(pages: &[Option<&str>]) -> Vec<u8> {
    let n = pages.len();
    // 1: catalog, 2: pages, 3: font, then (page, contents) pairs.
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();

    let mut objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), n).into_bytes(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ];
    for (i, text) in pages.iter().enumerate() {
        let contents_id = 5 + 2 * i;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >>",
                contents_id
            )
            .into_bytes(),
        );
        let stream = match text {
            Some(t) => format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", t),
            None => String::new(),
        };
        objects.push(
            format!("<< /Length {} >>\nstream\n{}\nendstream", stream.len(), stream).into_bytes(),
        );
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj ", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b" endobj\n");
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!("trailer << /Size {} /Root 1 0 R >>\nstartxref\n", objects.len() + 1).as_bytes(),
    );
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("out")).unwrap();
    fs::create_dir_all(root.join("input")).unwrap();

    let config = format!(
        r#"[storage]
base_dir = "{root}/out"
input_dir = "{root}/input"

[processors]
retry_delay_secs = 0
"#,
        root = root.display()
    );
    let config_path = root.join("config").join("intake.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

fn run_intake(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(intake_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run intake");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// All chunk records written under the storage base, one JSON value each.
fn read_chunks(tmp: &TempDir) -> Vec<serde_json::Value> {
    let dir = tmp.path().join("out").join("rag_staging").join("jsonl");
    let mut records = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            for line in fs::read_to_string(&path).unwrap().lines() {
                records.push(serde_json::from_str(line).unwrap());
            }
        }
    }
    records
}

#[test]
fn classify_digital_pdf() {
    let (tmp, config) = setup_env();
    let pdf = tmp.path().join("input").join("report.pdf");
    fs::write(
        &pdf,
        pdf_with_pages(&[Some("quarterly revenue summary"), Some("regional breakdown")]),
    )
    .unwrap();

    let (stdout, stderr, success) = run_intake(&config, &["classify", pdf.to_str().unwrap()]);
    assert!(success, "classify failed: {}", stderr);
    assert!(stdout.contains("type: digital"), "stdout: {}", stdout);
    assert!(stdout.contains("allowed: true"));
    assert!(stdout.contains("pages: 2 digital / 2 total"), "stdout: {}", stdout);
}

#[test]
fn classify_textless_pdf_as_scanned() {
    let (tmp, config) = setup_env();
    let pdf = tmp.path().join("input").join("scan.pdf");
    fs::write(&pdf, pdf_with_pages(&[None, None, None])).unwrap();

    let (stdout, _, success) = run_intake(&config, &["classify", pdf.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("type: scanned"), "stdout: {}", stdout);
}

#[test]
fn classify_reports_unreadable_pdf() {
    let (tmp, config) = setup_env();
    let pdf = tmp.path().join("input").join("bad.pdf");
    fs::write(&pdf, b"%PDF-1.4 truncated").unwrap();

    let (stdout, _, success) = run_intake(&config, &["classify", pdf.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("error:"), "stdout: {}", stdout);
}

#[test]
fn process_digital_pdf_end_to_end() {
    let (tmp, config) = setup_env();
    let pdf = tmp.path().join("input").join("report.pdf");
    fs::write(&pdf, pdf_with_pages(&[Some("quarterly revenue summary")])).unwrap();

    let (stdout, stderr, success) = run_intake(&config, &["process", "--auto"]);
    assert!(success, "process failed: {}", stderr);
    assert!(stdout.contains("successful: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("processor pdf_text: 1"), "stdout: {}", stdout);

    let chunks = read_chunks(&tmp);
    assert!(!chunks.is_empty());
    assert!(chunks
        .iter()
        .any(|c| c["text"].as_str().unwrap().contains("quarterly revenue summary")));
    assert_eq!(chunks[0]["chunk_index"], 0);
    assert_eq!(chunks[0]["source"]["file_name"], "report.pdf");
}

#[test]
fn process_docx_end_to_end() {
    let (tmp, config) = setup_env();
    let docx = tmp.path().join("input").join("memo.docx");
    fs::write(
        &docx,
        minimal_docx_with_text(&["office test phrase", "Second paragraph of the memo."]),
    )
    .unwrap();

    let (stdout, stderr, success) = run_intake(&config, &["process", docx.to_str().unwrap()]);
    assert!(success, "process failed: {}", stderr);
    assert!(stdout.contains("successful: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("processor docx: 1"));

    let chunks = read_chunks(&tmp);
    let all_text: String = chunks.iter().map(|c| c["text"].as_str().unwrap()).collect();
    assert!(all_text.contains("office test phrase"));
    assert!(all_text.contains("Second paragraph"));

    let markdown = tmp.path().join("out").join("rag_staging").join("markdown");
    assert_eq!(fs::read_dir(markdown).unwrap().count(), 1);
}

#[test]
fn scanned_pdf_without_ocr_endpoint_is_quarantined() {
    let (tmp, config) = setup_env();
    let pdf = tmp.path().join("input").join("scan.pdf");
    fs::write(&pdf, pdf_with_pages(&[None, None])).unwrap();

    let (stdout, stderr, success) = run_intake(&config, &["process", pdf.to_str().unwrap()]);
    assert!(success, "process failed: {}", stderr);
    assert!(stdout.contains("quarantined: 1"), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(&config, &["quarantine", "stats"]);
    assert!(stdout.contains("processor ocr: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("type .pdf: 1"), "stdout: {}", stdout);
}

#[test]
fn pdf_type_filter_selects_digital_only() {
    let (tmp, config) = setup_env();
    let input = tmp.path().join("input");
    fs::write(input.join("a.pdf"), pdf_with_pages(&[Some("text layer present")])).unwrap();
    fs::write(input.join("b.pdf"), pdf_with_pages(&[None])).unwrap();

    let (stdout, stderr, success) = run_intake(
        &config,
        &["process", "--auto", "--pdf-type", "digital", "--dry-run"],
    );
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("files to process: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("a.pdf"));
    assert!(!stdout.contains("b.pdf"));
}
