use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!("Failed to remove {:?}", path)),
    }
}

/// Replaces `dest` with `src` by removing `dest` and renaming `src` into place.
///
/// Not atomic: a failure after the removal leaves `dest` missing.
pub fn replace_dir(src: &Path, dest: &Path) -> Result<()> {
    remove_dir_if_exists(dest)?;
    fs::rename(src, dest).context(format!("Failed to rename {:?} to {:?}", src, dest))
}

/// Moves every non-hidden regular file in `src` into `dest`, replacing files
/// with the same name and leaving the rest of `dest` alone.
///
/// Returns the names of the files moved.
pub fn merge_files(src: &Path, dest: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context(format!("Failed to read directory {:?}", src)),
    };

    fs::create_dir_all(dest).context(format!("Failed to create directory {:?}", dest))?;

    let mut merged = Vec::new();
    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') {
            continue;
        }

        let file_type = entry
            .file_type()
            .context(format!("Failed to stat {:?}", entry.path()))?;
        if !file_type.is_file() {
            continue;
        }

        let target = dest.join(&name);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).context(format!("Failed to remove {:?}", target)),
        }

        fs::rename(entry.path(), &target)
            .context(format!("Failed to move {:?} to {:?}", entry.path(), target))?;
        debug!(file = %name, "merged state file");
        merged.push(name);
    }

    merged.sort();
    Ok(merged)
}
