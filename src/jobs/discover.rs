// SID file discovery

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cache::is_staging_file;
use crate::constants::SID_EXTENSION;
use crate::error::{Result, SidflowError};

/// Discover all SID files under a collection root, sorted by path.
///
/// Listing errors abort discovery; a partial file list would silently shrink
/// the run.
pub fn discover_sid_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(if is_sid_file(root) { vec![root.to_path_buf()] } else { Vec::new() });
    }
    if !root.is_dir() {
        return Err(SidflowError::SourceNotFound(root.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && is_sid_file(path) && !is_staging_file(path) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    log::debug!("Discovered {} SID files under {}", files.len(), root.display());
    Ok(files)
}

/// Check if a file is a SID tune based on extension
pub fn is_sid_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case(SID_EXTENSION),
        None => false,
    }
}
