use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::filetype::hash_bytes;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub metadata: MetadataConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub tables: TableConfig,
    #[serde(default)]
    pub processors: ProcessorsConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub entities: EntitiesConfig,
    /// First 16 hex chars of the SHA-256 of the config file text.
    #[serde(skip)]
    pub config_hash: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            schema_version: default_schema_version(),
        }
    }
}

fn default_config_version() -> String {
    "2.3.0".to_string()
}
fn default_schema_version() -> String {
    "2.3.0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages_absolute: usize,
    #[serde(default = "default_digital_cutoff")]
    pub percent_digital_cutoff: f64,
    #[serde(default = "default_low_min")]
    pub confidence_low_min: f64,
    #[serde(default = "default_low_max")]
    pub confidence_low_max: f64,
    #[serde(default = "default_prescan_pages")]
    pub prescan_pages: usize,
    #[serde(default = "default_prescan_min_digital")]
    pub prescan_min_digital: f64,
    #[serde(default = "default_image_check_min_digital")]
    pub image_check_min_digital: f64,
    #[serde(default = "default_sample_strata")]
    pub sample_strata: usize,
    #[serde(default = "default_samples_per_stratum")]
    pub samples_per_stratum: usize,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_full_page_area_ratio")]
    pub full_page_area_ratio: f64,
    #[serde(default = "default_scan_hits_to_stop")]
    pub scan_hits_to_stop: usize,
    #[serde(default = "default_scan_override_ratio")]
    pub scan_override_ratio: f64,
    /// Fallback heuristic: smallest image side (pixels) that can be a page scan.
    #[serde(default = "default_min_scan_pixels")]
    pub min_scan_pixels: u32,
    #[serde(default = "default_aspect_tolerance")]
    pub aspect_tolerance: f64,
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            max_pages_absolute: default_max_pages(),
            percent_digital_cutoff: default_digital_cutoff(),
            confidence_low_min: default_low_min(),
            confidence_low_max: default_low_max(),
            prescan_pages: default_prescan_pages(),
            prescan_min_digital: default_prescan_min_digital(),
            image_check_min_digital: default_image_check_min_digital(),
            sample_strata: default_sample_strata(),
            samples_per_stratum: default_samples_per_stratum(),
            max_samples: default_max_samples(),
            full_page_area_ratio: default_full_page_area_ratio(),
            scan_hits_to_stop: default_scan_hits_to_stop(),
            scan_override_ratio: default_scan_override_ratio(),
            min_scan_pixels: default_min_scan_pixels(),
            aspect_tolerance: default_aspect_tolerance(),
            sample_seed: default_sample_seed(),
        }
    }
}

fn default_max_pages() -> usize {
    200
}
fn default_digital_cutoff() -> f64 {
    0.75
}
fn default_low_min() -> f64 {
    0.65
}
fn default_low_max() -> f64 {
    0.85
}
fn default_prescan_pages() -> usize {
    3
}
fn default_prescan_min_digital() -> f64 {
    0.05
}
fn default_image_check_min_digital() -> f64 {
    0.5
}
fn default_sample_strata() -> usize {
    5
}
fn default_samples_per_stratum() -> usize {
    2
}
fn default_max_samples() -> usize {
    10
}
fn default_full_page_area_ratio() -> f64 {
    0.80
}
fn default_scan_hits_to_stop() -> usize {
    3
}
fn default_scan_override_ratio() -> f64 {
    0.50
}
fn default_min_scan_pixels() -> u32 {
    1000
}
fn default_aspect_tolerance() -> f64 {
    0.15
}
fn default_sample_seed() -> u64 {
    0x5eed_1e55
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_token_target")]
    pub token_target: usize,
    #[serde(default = "default_token_min")]
    pub token_min: usize,
    #[serde(default = "default_token_max")]
    pub token_max: usize,
    /// Below this many paragraphs the text is split on sentences instead.
    #[serde(default = "default_sentence_fallback")]
    pub sentence_fallback_paragraphs: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            token_target: default_token_target(),
            token_min: default_token_min(),
            token_max: default_token_max(),
            sentence_fallback_paragraphs: default_sentence_fallback(),
        }
    }
}

fn default_token_target() -> usize {
    1400
}
fn default_token_min() -> usize {
    800
}
fn default_token_max() -> usize {
    2000
}
fn default_sentence_fallback() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    #[serde(default = "default_blank_row_threshold")]
    pub blank_row_threshold: f64,
    #[serde(default = "default_schema_change_threshold")]
    pub schema_change_threshold: f64,
    #[serde(default = "default_header_threshold")]
    pub header_detection_threshold: f64,
    #[serde(default = "default_max_rows")]
    pub max_rows_per_chunk: usize,
    #[serde(default = "default_true")]
    pub skip_hidden_sheets: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            blank_row_threshold: default_blank_row_threshold(),
            schema_change_threshold: default_schema_change_threshold(),
            header_detection_threshold: default_header_threshold(),
            max_rows_per_chunk: default_max_rows(),
            skip_hidden_sheets: true,
        }
    }
}

fn default_blank_row_threshold() -> f64 {
    0.90
}
fn default_schema_change_threshold() -> f64 {
    0.30
}
fn default_header_threshold() -> f64 {
    0.80
}
fn default_max_rows() -> usize {
    2000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorsConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_classify_workers")]
    pub classify_workers: usize,
    #[serde(default = "default_batch_workers")]
    pub batch_workers: usize,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            classify_workers: default_classify_workers(),
            batch_workers: default_batch_workers(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_lock_timeout_secs() -> u64 {
    1
}
fn default_classify_workers() -> usize {
    6
}
fn default_batch_workers() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    crate::filetype::SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| format!("**/*{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// HTTP endpoint of the OCR service. Scanned files fail permanently
    /// when this is unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ocr_batch_size")]
    pub batch_size: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            timeout_secs: default_ocr_timeout_secs(),
            batch_size: default_ocr_batch_size(),
        }
    }
}

fn default_ocr_timeout_secs() -> u64 {
    300
}
fn default_ocr_batch_size() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EntitiesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_entities_model")]
    pub model: String,
    #[serde(default = "default_entities_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_entities_model(),
            endpoint: default_entities_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_entities_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_entities_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

/// Every on-disk location the pipeline reads or writes, derived from
/// `storage.base_dir`.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub base: PathBuf,
    pub input: Option<PathBuf>,
    pub jsonl: PathBuf,
    pub markdown: PathBuf,
    pub manifests: PathBuf,
    pub inventory_csv: PathBuf,
    pub quarantine: PathBuf,
    pub quarantine_csv: PathBuf,
    pub state_cache: PathBuf,
    pub lock_file: PathBuf,
}

impl StoragePaths {
    pub fn from_config(config: &Config) -> Self {
        let base = config.storage.base_dir.clone();
        let staging = base.join("rag_staging");
        let quarantine = base.join("quarantine");
        Self {
            input: config.storage.input_dir.clone(),
            jsonl: staging.join("jsonl"),
            markdown: staging.join("markdown"),
            manifests: base.join("manifests"),
            inventory_csv: base.join("inventory").join("inventory.csv"),
            quarantine_csv: quarantine.join("quarantine.csv"),
            quarantine,
            state_cache: base.join("state").join("processed_hashes.json"),
            lock_file: base.join(".intake.lock"),
            base,
        }
    }

    /// Create every output directory that does not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            self.jsonl.as_path(),
            self.markdown.as_path(),
            self.manifests.as_path(),
            self.quarantine.as_path(),
        ];
        for dir in dirs
            .into_iter()
            .chain(self.inventory_csv.parent())
            .chain(self.state_cache.parent())
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.config_hash = hash_bytes(content.as_bytes())[..16].to_string();
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let c = &config.classification;
    if c.max_pages_absolute == 0 {
        bail!("classification.max_pages_absolute must be > 0");
    }
    for (name, v) in [
        ("percent_digital_cutoff", c.percent_digital_cutoff),
        ("confidence_low_min", c.confidence_low_min),
        ("confidence_low_max", c.confidence_low_max),
        ("prescan_min_digital", c.prescan_min_digital),
        ("image_check_min_digital", c.image_check_min_digital),
        ("full_page_area_ratio", c.full_page_area_ratio),
        ("scan_override_ratio", c.scan_override_ratio),
        ("aspect_tolerance", c.aspect_tolerance),
    ] {
        if !(0.0..=1.0).contains(&v) {
            bail!("classification.{} must be in [0.0, 1.0]", name);
        }
    }
    if c.confidence_low_min > c.confidence_low_max {
        bail!("classification.confidence_low_min must be <= confidence_low_max");
    }
    if c.sample_strata == 0 || c.samples_per_stratum == 0 {
        bail!("classification.sample_strata and samples_per_stratum must be > 0");
    }

    let ch = &config.chunking;
    if ch.token_min == 0 {
        bail!("chunking.token_min must be > 0");
    }
    if !(ch.token_min <= ch.token_target && ch.token_target <= ch.token_max) {
        bail!(
            "chunking thresholds must satisfy token_min <= token_target <= token_max (got {} / {} / {})",
            ch.token_min,
            ch.token_target,
            ch.token_max
        );
    }

    let t = &config.tables;
    for (name, v) in [
        ("blank_row_threshold", t.blank_row_threshold),
        ("schema_change_threshold", t.schema_change_threshold),
        ("header_detection_threshold", t.header_detection_threshold),
    ] {
        if !(0.0..=1.0).contains(&v) {
            bail!("tables.{} must be in [0.0, 1.0]", name);
        }
    }
    if t.max_rows_per_chunk == 0 {
        bail!("tables.max_rows_per_chunk must be > 0");
    }

    if config.processors.classify_workers == 0 || config.processors.batch_workers == 0 {
        bail!("processors.classify_workers and batch_workers must be >= 1");
    }
    if config.ocr.batch_size == 0 {
        bail!("ocr.batch_size must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
