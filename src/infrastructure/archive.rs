//! Zip packing of a finished run directory.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::{AppError, Result};

/// Pack every file under `source_dir` into `dest`, paths relative to `source_dir`.
///
/// Entries are written in sorted order so the same tree always yields the
/// same entry list. The archive is built under a temp name and renamed when
/// complete.
///
/// # Errors
/// Returns error if the tree cannot be read or the archive cannot be written.
pub fn pack_directory(source_dir: &Path, dest: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    collect_entries(source_dir, &mut entries)?;
    entries.sort();

    let temp = dest.with_extension("zip.tmp");
    let file = File::create(&temp)
        .map_err(|e| AppError::io(format!("Failed to create {}", temp.display()), e))?;

    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for path in &entries {
        let name = entry_name(source_dir, path)?;

        if path.is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(|e| AppError::archive(dest, e.to_string()))?;
            continue;
        }

        zip.start_file(name, options)
            .map_err(|e| AppError::archive(dest, e.to_string()))?;
        let mut input = File::open(path)
            .map_err(|e| AppError::io(format!("Failed to open {}", path.display()), e))?;
        io::copy(&mut input, &mut zip)
            .map_err(|e| AppError::io(format!("Failed to pack {}", path.display()), e))?;
    }

    zip.finish()
        .map_err(|e| AppError::archive(dest, e.to_string()))?;

    fs::rename(&temp, dest).map_err(|e| {
        AppError::io(
            format!("Failed to rename {} to {}", temp.display(), dest.display()),
            e,
        )
    })?;

    tracing::info!(
        archive = %dest.display(),
        entries = entries.len(),
        "Archive written"
    );

    Ok(dest.to_path_buf())
}

/// Collect files and directories below `dir`, excluding `dir` itself.
fn collect_entries(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let read = fs::read_dir(dir)
        .map_err(|e| AppError::io(format!("Failed to read directory {}", dir.display()), e))?;

    for entry in read {
        let entry = entry
            .map_err(|e| AppError::io(format!("Failed to read entry in {}", dir.display()), e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| AppError::io(format!("Failed to stat {}", path.display()), e))?;

        if file_type.is_dir() {
            out.push(path.clone());
            collect_entries(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }

    Ok(())
}

/// Archive entry name with `/` separators.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| AppError::InvalidData {
        message: format!("{} is outside {}", path.display(), root.display()),
    })?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_pack_preserves_relative_paths() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("guild_20240501_100000");
        fs::create_dir_all(root.join("channels/chat_attachments")).unwrap();
        fs::create_dir_all(root.join("threads")).unwrap();
        fs::write(root.join("structure.json"), "{}").unwrap();
        fs::write(root.join("channels/chat.json"), "[\"héllo\"]").unwrap();
        fs::write(root.join("channels/chat_attachments/1_0_cat.png"), [1u8, 2, 3]).unwrap();

        let dest = dir.path().join("guild_20240501_100000.zip");
        let written = pack_directory(&root, &dest).unwrap();
        assert_eq!(written, dest);
        assert!(!dir.path().join("guild_20240501_100000.zip.tmp").exists());

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("channels/chat.json")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "[\"héllo\"]");

        let mut bytes = Vec::new();
        archive
            .by_name("channels/chat_attachments/1_0_cat.png")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        assert!(archive.by_name("threads/").is_ok());
        assert!(archive.by_name("structure.json").is_ok());
    }

    #[test]
    fn test_pack_missing_source_fails() {
        let dir = tempdir().unwrap();
        let result = pack_directory(&dir.path().join("nope"), &dir.path().join("nope.zip"));
        assert!(matches!(result, Err(AppError::Io { .. })));
    }
}
