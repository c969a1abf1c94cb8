//! Inventory and batch progress reporting.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for scripts.
//! Human mode prints one line per event; JSON mode prints one object per
//! line.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Walking the input directory. Total unknown.
    Discovering { root: String },
    /// Classification pass: `n` of `total` files inspected.
    Classifying { n: u64, total: u64 },
    /// Batch `batch` of `batches` started.
    BatchStarted {
        batch_id: String,
        batch: u64,
        batches: u64,
        files: u64,
    },
    /// One file finished with the given status.
    FileDone {
        batch_id: String,
        file: String,
        status: String,
        n: u64,
        total: u64,
    },
}

/// Reports progress. Shared across worker threads.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "classify  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { root } => format!("discover {}  scanning...\n", root),
            ProgressEvent::Classifying { n, total } => format!(
                "classify  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::BatchStarted {
                batch_id,
                batch,
                batches,
                files,
            } => format!(
                "batch {}/{} {}  {} files\n",
                batch, batches, batch_id, files
            ),
            ProgressEvent::FileDone {
                file,
                status,
                n,
                total,
                ..
            } => format!("  [{}/{}] {}  {}\n", n, total, status, file),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root,
            }),
            ProgressEvent::Classifying { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "classifying",
                "n": n,
                "total": total,
            }),
            ProgressEvent::BatchStarted {
                batch_id,
                batch,
                batches,
                files,
            } => serde_json::json!({
                "event": "batch_started",
                "batch_id": batch_id,
                "batch": batch,
                "batches": batches,
                "files": files,
            }),
            ProgressEvent::FileDone {
                batch_id,
                file,
                status,
                n,
                total,
            } => serde_json::json!({
                "event": "file_done",
                "batch_id": batch_id,
                "file": file,
                "status": status,
                "n": n,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
