//! # Intake Harness
//!
//! Document intake for retrieval pipelines: decide how each file must be
//! read, cut its text into bounded chunks, and drive many files through
//! extraction with retry, quarantine and skip-if-already-processed
//! semantics.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Inventory  │──▶│ Classifier │──▶│ Orchestrator │──▶│  Handlers    │
//! │ walk+hash  │   │ digital vs │   │ retry, quar- │   │ pdf/ocr/docx │
//! └────────────┘   │  scanned   │   │ antine, state│   │ tabular      │
//!                  └────────────┘   └──────┬───────┘   └──────┬───────┘
//!                                          │                  ▼
//!                                          │           ┌────────────┐
//!                                          ▼           │  Chunker   │
//!                         manifest / quarantine CSV    └─────┬──────┘
//!                                                            ▼
//!                                          jsonl + markdown + _SUCCESS
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, defaults and validation |
//! | [`models`] | Records exchanged between stages |
//! | [`filetype`] | Content hashing, extension and MIME mapping |
//! | [`error`] | Error classes and the retry policy |
//! | [`pdf`] | `lopdf` page inspection for the classifier |
//! | [`classify`] | Digital / scanned / rejected decision |
//! | [`chunk`] | Token-bounded text chunking |
//! | [`table`] | Table-boundary detection for spreadsheets and CSV |
//! | [`extract`] | PDF text, DOCX, XLSX and CSV readers |
//! | [`ocr`] | OCR service client |
//! | [`enrich`] | Optional embeddings and entity extraction |
//! | [`handlers`] | Processor routing and worker-owned resources |
//! | [`store`] | Chunk store and completion markers |
//! | [`state`] | Processed-hash tracking and reset |
//! | [`manifest`] | Per-batch manifest and summaries |
//! | [`quarantine`] | Terminal-failure storage |
//! | [`orchestrator`] | Per-file retry loop and batch dispatch |
//! | [`inventory`] | Discovery and parallel classification |
//! | [`lock`] | Run lock and storage health probe |
//! | [`progress`] | Progress events on stderr |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`ingest`] | CLI command implementations |

pub mod chunk;
pub mod classify;
pub mod config;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod filetype;
pub mod handlers;
pub mod ingest;
pub mod inventory;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod pdf;
pub mod progress;
pub mod quarantine;
pub mod state;
pub mod store;
pub mod table;
