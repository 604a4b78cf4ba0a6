// Project tree walk and fingerprinting

use crate::config::ResolvedConfig;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A file found on disk, with both its absolute path and its relative
/// unix-style key.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
}

/// Relative unix-style path of `path` under `root`, or None when `path`
/// is outside the root.
pub fn relative_unix_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk the project root honoring the configured extensions and ignore
/// patterns, in sorted order.
pub fn walk_project_tree(config: &ResolvedConfig) -> Vec<WalkedFile> {
    let root = &config.project_root;
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            // Cheap directory-level pruning; file-level globs decide the rest.
            let name = entry.file_name().to_string_lossy();
            !(name == "node_modules" || name == ".git" || name == config.data_dir)
        });

    for entry in walker.into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel_path) = relative_unix_path(entry.path(), root) else {
            continue;
        };
        if !config.is_indexable(&rel_path) {
            continue;
        }
        files.push(WalkedFile {
            abs_path: entry.path().to_path_buf(),
            rel_path,
        });
    }

    debug!("Walk found {} indexable files", files.len());
    files
}

/// blake3 hex digest of raw bytes.
pub fn hash_content(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Modification time in fractional milliseconds plus size, from one stat.
pub fn stat_file(path: &Path) -> Result<(f64, i64)> {
    let metadata = std::fs::metadata(path)?;
    let mtime_ms = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0);
    Ok((mtime_ms, metadata.len() as i64))
}
