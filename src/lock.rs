//! Run guard: one orchestrator per output area, on a writable store.

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Advisory lock file holding the owner's pid. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file, waiting up to `timeout` for another run to
    /// release it.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    debug!(lock = %path.display(), "acquired run lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        let holder = std::fs::read_to_string(path).unwrap_or_default();
                        bail!(
                            "Another intake run holds the lock {} (pid {}). If no run is active, delete the stale lock file.",
                            path.display(),
                            holder.trim()
                        );
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create lock {}", path.display()))
                }
            }
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "could not remove run lock");
        }
    }
}

/// Write and remove a probe file to prove `base_dir` is writable.
pub fn check_mount_health(base_dir: &Path) -> Result<()> {
    if !base_dir.is_dir() {
        bail!("Storage directory is not available: {}", base_dir.display());
    }
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let probe = base_dir.join(format!(".mount_test_{}_{}.tmp", std::process::id(), ts));
    std::fs::write(&probe, b"ok")
        .with_context(|| format!("Storage is not writable: {}", base_dir.display()))?;
    std::fs::remove_file(&probe)
        .with_context(|| format!("Storage probe could not be removed: {}", probe.display()))?;
    Ok(())
}
