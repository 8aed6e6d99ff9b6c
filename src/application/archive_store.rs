//! Archive housekeeping.
//!
//! Lists finished backup archives and prunes them by age.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::domain::{AppError, Result};

const SECONDS_PER_DAY: u64 = 86_400;

/// Finished archives under one backup root.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// List all `.zip` archives, newest first.
    ///
    /// # Errors
    /// Returns error if the backup root cannot be read.
    pub fn list(&self) -> Result<Vec<ArchiveInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|e| AppError::io("Failed to read backup directory", e))?;

        let mut archives = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "zip") {
                continue;
            }

            let metadata = fs::metadata(&path)
                .map_err(|e| AppError::io("Failed to read archive metadata", e))?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            archives.push(ArchiveInfo {
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
                path,
                size_bytes: metadata.len(),
                modified,
            });
        }

        archives.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));

        Ok(archives)
    }

    /// Delete archives older than `retention_days`; 0 keeps everything.
    ///
    /// # Errors
    /// Returns error if the backup root cannot be read.
    pub fn prune(&self, retention_days: u32) -> Result<CleanupResult> {
        self.prune_at(retention_days, SystemTime::now())
    }

    /// [`prune`](Self::prune) measured against an explicit clock.
    ///
    /// # Errors
    /// Returns error if the backup root cannot be read.
    pub fn prune_at(&self, retention_days: u32, now: SystemTime) -> Result<CleanupResult> {
        let mut result = CleanupResult::default();
        if retention_days == 0 {
            return Ok(result);
        }

        for archive in self.list()? {
            let age_days = now
                .duration_since(archive.modified)
                .unwrap_or_default()
                .as_secs()
                / SECONDS_PER_DAY;

            if age_days <= u64::from(retention_days) {
                continue;
            }

            if let Err(e) = fs::remove_file(&archive.path) {
                tracing::warn!(path = %archive.path.display(), error = %e, "Failed to delete archive");
                continue;
            }
            result.deleted_count += 1;
            result.freed_bytes += archive.size_bytes;

            // The unpacked run directory shares the archive's stem.
            let run_dir = archive.path.with_extension("");
            if run_dir.is_dir() {
                let size = calculate_dir_size(&run_dir).unwrap_or(0);
                match fs::remove_dir_all(&run_dir) {
                    Ok(()) => result.freed_bytes += size,
                    Err(e) => tracing::warn!(
                        path = %run_dir.display(),
                        error = %e,
                        "Failed to delete run directory"
                    ),
                }
            }

            tracing::info!(
                path = %archive.path.display(),
                age_days = age_days,
                "Deleted old backup"
            );
        }

        Ok(result)
    }
}

/// One archive on disk.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// File stem, which is the run directory name.
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

impl ArchiveInfo {
    #[must_use]
    pub fn modified_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.modified)
    }

    #[must_use]
    pub fn size_human(&self) -> String {
        format_bytes(self.size_bytes)
    }
}

/// Result of a cleanup operation.
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    /// Number of archives deleted.
    pub deleted_count: usize,
    /// Total bytes freed, run directories included.
    pub freed_bytes: u64,
}

impl CleanupResult {
    /// Format freed bytes as human readable.
    #[must_use]
    pub fn freed_human(&self) -> String {
        format_bytes(self.freed_bytes)
    }
}

/// Calculate total size of a directory recursively.
fn calculate_dir_size(path: &Path) -> Result<u64> {
    let mut total = 0u64;

    let entries = fs::read_dir(path)
        .map_err(|e| AppError::io(format!("Failed to read directory {}", path.display()), e))?;

    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        let metadata = fs::metadata(&path)
            .map_err(|e| AppError::io(format!("Failed to read metadata {}", path.display()), e))?;

        if metadata.is_file() {
            total += metadata.len();
        } else if metadata.is_dir() {
            total += calculate_dir_size(&path)?;
        }
    }

    Ok(total)
}

/// Format bytes as human readable string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;

    if bytes >= GB {
        format!("{:.2} GB", value / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", value / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", value / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
