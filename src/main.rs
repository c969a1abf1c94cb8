//! # Intake Harness CLI (`intake`)
//!
//! The `intake` binary drives document intake: inventory, classification,
//! batch processing and state management.
//!
//! ## Usage
//!
//! ```bash
//! intake --config ./config/intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intake process FILES..` | Process the given files |
//! | `intake process --auto` | Discover, classify and process the input directory |
//! | `intake inventory` | Rebuild the inventory CSV and print statistics |
//! | `intake classify FILES..` | Classify PDFs without processing them |
//! | `intake state status` | Show completion-marker and cache state |
//! | `intake state clear [--hash H]` | Forget processed files so they run again |
//! | `intake quarantine stats` | Summarise quarantined files |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what an automatic run would do
//! intake process --auto --dry-run
//!
//! # Process digital PDFs only, newest first, 10 per batch
//! intake process --auto --file-types .pdf --pdf-type digital --sort-by mtime-desc --batch-size 10
//!
//! # Re-run a single document
//! intake process --auto --reprocess-hash 3f9a2c
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use intake_harness::config;
use intake_harness::ingest::{self, ProcessOptions};
use intake_harness::inventory::SortOrder;
use intake_harness::logging::init_logging;
use intake_harness::models::DocClass;
use intake_harness::progress::ProgressMode;

/// Intake Harness: document classification, chunking and batch
/// orchestration for retrieval pipelines.
#[derive(Parser)]
#[command(
    name = "intake",
    about = "Intake Harness: classify, chunk and batch-process documents for retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/intake.toml`.
    #[arg(long, global = true, default_value = "./config/intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PdfType {
    Digital,
    Scanned,
}

impl From<PdfType> for DocClass {
    fn from(t: PdfType) -> Self {
        match t {
            PdfType::Digital => DocClass::Digital,
            PdfType::Scanned => DocClass::Scanned,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process files through classification, extraction and chunking.
    ///
    /// Files already processed (a completion marker exists for their
    /// current content) are skipped unless a reprocess flag is given.
    Process {
        /// Files to process. Ignored with `--auto`.
        files: Vec<PathBuf>,

        /// Discover files from `storage.input_dir` through the inventory.
        #[arg(long)]
        auto: bool,

        /// Only these type tags, e.g. `.pdf .docx`.
        #[arg(long, num_args = 1..)]
        file_types: Vec<String>,

        /// Only PDFs with this classification.
        #[arg(long, value_enum)]
        pdf_type: Option<PdfType>,

        /// Files per batch (one manifest per batch).
        #[arg(long, default_value_t = 5)]
        batch_size: usize,

        #[arg(long, value_enum, default_value = "name")]
        sort_by: SortOrder,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// List what would be processed without processing anything.
        #[arg(long)]
        dry_run: bool,

        /// Batch workers; overrides `processors.batch_workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Do not call the embedding or entity services.
        #[arg(long)]
        skip_enrichment: bool,

        /// Rebuild the inventory before processing.
        #[arg(long)]
        rebuild_inventory: bool,

        /// Process files even when they were processed before.
        #[arg(long)]
        no_skip_processed: bool,

        /// Clear every completion marker, then process.
        #[arg(long, conflicts_with = "reprocess_hash")]
        reprocess_all: bool,

        /// Clear markers whose hash starts with this prefix, then process.
        #[arg(long)]
        reprocess_hash: Option<String>,

        /// Progress on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Discover and classify the input directory, writing the inventory CSV.
    Inventory {
        #[arg(long, value_enum, default_value = "name")]
        sort_by: SortOrder,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Classify PDFs and print the verdict.
    Classify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Inspect or reset processing state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Inspect quarantined files.
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Show completion markers and hash-cache freshness.
    Status,
    /// Remove completion markers. Chunk output is kept.
    Clear {
        /// Only markers whose content hash starts with this prefix.
        #[arg(long)]
        hash: Option<String>,
    },
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// Counts by file type, processor and error class.
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Process {
            files,
            auto,
            file_types,
            pdf_type,
            batch_size,
            sort_by,
            limit,
            dry_run,
            workers,
            skip_enrichment,
            rebuild_inventory,
            no_skip_processed,
            reprocess_all,
            reprocess_hash,
            progress,
        } => {
            let opts = ProcessOptions {
                files,
                auto,
                file_types,
                pdf_type: pdf_type.map(DocClass::from),
                batch_size,
                sort_by,
                limit,
                dry_run,
                workers,
                skip_enrichment,
                rebuild_inventory,
                no_skip_processed,
                reprocess_all,
                reprocess_hash,
            };
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            ingest::run_process(&cfg, &opts, reporter.as_ref())?;
        }
        Commands::Inventory { sort_by, progress } => {
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            ingest::run_inventory(&cfg, sort_by, reporter.as_ref())?;
        }
        Commands::Classify { files } => {
            ingest::run_classify(&cfg, &files)?;
        }
        Commands::State { action } => match action {
            StateAction::Status => ingest::run_state_status(&cfg)?,
            StateAction::Clear { hash } => ingest::run_state_clear(&cfg, hash.as_deref())?,
        },
        Commands::Quarantine { action } => match action {
            QuarantineAction::Stats => ingest::run_quarantine_stats(&cfg)?,
        },
    }

    Ok(())
}
