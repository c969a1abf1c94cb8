//! Processed-file tracking.
//!
//! Completion markers in the chunk store are the source of truth for "this
//! content was already processed". Reading every marker is slow on network
//! mounts, so the set of hashes is cached in `state/processed_hashes.json`
//! together with a fingerprint of the marker set:
//!
//! ```text
//! list markers ──► fingerprint = sha256(sorted marker names)
//!                       │
//!         cache.fingerprint == fingerprint ?
//!            yes │                 │ no
//!                ▼                 ▼
//!          cached hashes     read every marker, rewrite cache
//! ```
//!
//! Clearing state removes markers (and the cache), never chunk output.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::StoragePaths;
use crate::filetype::hash_bytes;
use crate::models::InventoryRecord;
use crate::store::{list_markers, read_marker, write_atomic};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HashCache {
    processed_hashes: BTreeSet<String>,
    built_at: String,
    marker_count: usize,
    fingerprint: String,
    count: usize,
}

/// Snapshot for `intake state status`.
#[derive(Debug, Clone)]
pub struct StateStatus {
    pub markers: usize,
    pub processed_hashes: usize,
    pub cache_path: PathBuf,
    pub cache_built_at: Option<String>,
    pub cache_fresh: bool,
}

fn marker_fingerprint(markers: &[PathBuf]) -> String {
    let mut joined = String::new();
    for m in markers {
        if let Some(name) = m.file_name() {
            joined.push_str(&name.to_string_lossy());
            joined.push('\n');
        }
    }
    hash_bytes(joined.as_bytes())
}

fn load_cache(path: &Path) -> Option<HashCache> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable hash cache");
            None
        }
    }
}

fn save_cache(path: &Path, cache: &HashCache) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_vec_pretty(cache)?;
    write_atomic(path, &body).with_context(|| format!("Failed to write {}", path.display()))
}

fn rebuild(markers: &[PathBuf], fingerprint: String) -> HashCache {
    let mut hashes = BTreeSet::new();
    for path in markers {
        match read_marker(path) {
            Ok(marker) => {
                hashes.insert(marker.file_hash);
            }
            Err(e) => warn!(marker = %path.display(), error = %e, "skipping corrupt completion marker"),
        }
    }
    HashCache {
        count: hashes.len(),
        processed_hashes: hashes,
        built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        marker_count: markers.len(),
        fingerprint,
    }
}

/// Content hashes of every successfully processed file.
pub fn get_processed_hashes(paths: &StoragePaths) -> Result<HashSet<String>> {
    let markers = list_markers(&paths.jsonl)?;
    let fingerprint = marker_fingerprint(&markers);

    if let Some(cache) = load_cache(&paths.state_cache) {
        if cache.fingerprint == fingerprint && cache.marker_count == markers.len() {
            debug!(hashes = cache.count, "hash cache is current");
            return Ok(cache.processed_hashes.into_iter().collect());
        }
    }

    info!(markers = markers.len(), "rebuilding processed-hash cache");
    let cache = rebuild(&markers, fingerprint);
    if let Err(e) = save_cache(&paths.state_cache, &cache) {
        warn!(error = %e, "could not persist hash cache");
    }
    Ok(cache.processed_hashes.into_iter().collect())
}

/// Drop inventory rows whose content hash already has a completion marker.
pub fn filter_unprocessed(
    inventory: Vec<InventoryRecord>,
    processed: &HashSet<String>,
) -> Vec<InventoryRecord> {
    inventory
        .into_iter()
        .filter(|r| !processed.contains(&r.hash_sha256))
        .collect()
}

/// Remove completion markers so the matching files are processed again.
///
/// With `hash`, only markers whose recorded hash starts with it are
/// removed; without, every marker goes. The hash cache is always dropped.
/// Returns the number of markers removed.
pub fn clear_state(paths: &StoragePaths, hash: Option<&str>) -> Result<usize> {
    let mut removed = 0;
    for path in list_markers(&paths.jsonl)? {
        let matches = match hash {
            None => true,
            Some(prefix) => match read_marker(&path) {
                Ok(marker) => marker.file_hash.starts_with(prefix),
                Err(e) => {
                    warn!(marker = %path.display(), error = %e, "skipping corrupt completion marker");
                    false
                }
            },
        };
        if matches {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            removed += 1;
        }
    }

    if paths.state_cache.exists() {
        std::fs::remove_file(&paths.state_cache)
            .with_context(|| format!("Failed to remove {}", paths.state_cache.display()))?;
    }
    info!(removed, hash = hash.unwrap_or("*"), "cleared processing state");
    Ok(removed)
}

pub fn state_status(paths: &StoragePaths) -> Result<StateStatus> {
    let markers = list_markers(&paths.jsonl)?;
    let fingerprint = marker_fingerprint(&markers);
    let cache = load_cache(&paths.state_cache);
    let cache_fresh = cache
        .as_ref()
        .is_some_and(|c| c.fingerprint == fingerprint && c.marker_count == markers.len());
    let processed = get_processed_hashes(paths)?;
    Ok(StateStatus {
        markers: markers.len(),
        processed_hashes: processed.len(),
        cache_path: paths.state_cache.clone(),
        cache_built_at: cache.map(|c| c.built_at),
        cache_fresh,
    })
}
