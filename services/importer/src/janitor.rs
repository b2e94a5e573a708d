//! Retention janitor: prunes stale run directories from the tile tree.
//!
//! Each model's subtree (`{tiles}/gfs`, `{tiles}/ecmwf`) holds one
//! directory per issuance. A directory is deleted once its modification
//! time is strictly more than the retention threshold in the past.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use forecast_common::Model;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ImportError;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JanitorStats {
    pub scanned: usize,
    pub deleted: usize,
    pub kept: usize,
    pub failed: usize,
}

impl JanitorStats {
    fn merge(&mut self, other: JanitorStats) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.kept += other.kept;
        self.failed += other.failed;
    }
}

/// Sweep every model's subtree under `tiles_root`.
pub fn sweep_models(tiles_root: &Path, models: &[Model], threshold_days: u32) -> JanitorStats {
    let mut total = JanitorStats::default();
    for model in models {
        let root = tiles_root.join(model.as_str());
        total.merge(sweep(&root, threshold_days));
    }
    info!(
        scanned = total.scanned,
        deleted = total.deleted,
        kept = total.kept,
        failed = total.failed,
        "Retention sweep complete"
    );
    metrics::counter!("importer_janitor_deleted_total").increment(total.deleted as u64);
    total
}

/// Sweep the immediate subdirectories of `root` against the current time.
pub fn sweep(root: &Path, threshold_days: u32) -> JanitorStats {
    let threshold = Duration::from_secs(u64::from(threshold_days) * SECONDS_PER_DAY);
    sweep_with(root, threshold, SystemTime::now(), |path| fs::remove_dir_all(path))
}

/// Sweep with an explicit clock and removal function.
///
/// Per-directory failures are logged and counted; they never stop the
/// sweep. A missing root is a no-op.
pub fn sweep_with<F>(root: &Path, threshold: Duration, now: SystemTime, remove: F) -> JanitorStats
where
    F: Fn(&Path) -> io::Result<()>,
{
    let mut stats = JanitorStats::default();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "Tile root missing, nothing to sweep");
            return stats;
        }
        Err(source) => {
            let err = ImportError::Janitor {
                path: root.to_path_buf(),
                source,
            };
            warn!(error = %err, "Failed to list tile root");
            stats.failed += 1;
            return stats;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                warn!(error = %source, root = %root.display(), "Failed to read directory entry");
                stats.failed += 1;
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        stats.scanned += 1;

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(source) => {
                let err = ImportError::Janitor { path, source };
                warn!(error = %err, "Failed to read modification time");
                stats.failed += 1;
                continue;
            }
        };

        // A modification time in the future counts as age zero.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= threshold {
            stats.kept += 1;
            continue;
        }

        match remove(&path) {
            Ok(()) => {
                info!(path = %path.display(), age_hours = age.as_secs() / 3600, "Deleted stale tiles");
                stats.deleted += 1;
            }
            Err(source) => {
                let err = ImportError::Janitor { path, source };
                warn!(error = %err, "Failed to delete stale tiles");
                stats.failed += 1;
            }
        }
    }

    stats
}

/// Remove scratch files left in `temp_dir` by a run that did not finish.
///
/// Only call this while no job is running: every regular file directly
/// under `temp_dir` is treated as abandoned. Subdirectories are left alone.
pub fn clear_staging(temp_dir: &Path) -> JanitorStats {
    let mut stats = JanitorStats::default();

    let entries = match fs::read_dir(temp_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return stats,
        Err(source) => {
            let err = ImportError::Janitor {
                path: temp_dir.to_path_buf(),
                source,
            };
            warn!(error = %err, "Failed to list staging directory");
            stats.failed += 1;
            return stats;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        stats.scanned += 1;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed abandoned staging file");
                stats.deleted += 1;
            }
            Err(source) => {
                let err = ImportError::Janitor { path, source };
                warn!(error = %err, "Failed to remove staging file");
                stats.failed += 1;
            }
        }
    }

    if stats.deleted > 0 {
        info!(
            dir = %temp_dir.display(),
            deleted = stats.deleted,
            "Cleared abandoned staging files"
        );
    }
    stats
}
