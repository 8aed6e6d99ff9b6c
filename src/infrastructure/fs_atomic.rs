//! Crash-safe file writes.
//!
//! Content goes to a sibling temp file which is renamed over the target, so
//! a reader sees either the previous file or the complete new one.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::domain::{AppError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `data` to `path` via temp file + rename.
///
/// # Errors
/// Returns error if the temp file cannot be written or renamed.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp = temp_path(path);

    let mut file = tokio::fs::File::create(&temp)
        .await
        .map_err(|e| AppError::io(format!("Failed to create {}", temp.display()), e))?;
    file.write_all(data)
        .await
        .map_err(|e| AppError::io(format!("Failed to write {}", temp.display()), e))?;
    file.sync_all()
        .await
        .map_err(|e| AppError::io(format!("Failed to sync {}", temp.display()), e))?;
    drop(file);

    tokio::fs::rename(&temp, path).await.map_err(|e| {
        AppError::io(
            format!("Failed to rename {} to {}", temp.display(), path.display()),
            e,
        )
    })
}

/// Blocking variant for code already off the async runtime.
///
/// # Errors
/// Returns error if the temp file cannot be written or renamed.
pub fn write_atomic_blocking(path: &Path, data: &[u8]) -> Result<()> {
    let temp = temp_path(path);
    std::fs::write(&temp, data)
        .map_err(|e| AppError::io(format!("Failed to write {}", temp.display()), e))?;
    std::fs::rename(&temp, path).map_err(|e| {
        AppError::io(
            format!("Failed to rename {} to {}", temp.display(), path.display()),
            e,
        )
    })
}
