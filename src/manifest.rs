//! Local manifest: the set of media files physically present in the cache
//! directory, regenerated on every scan.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Directory under the cache dir holding in-flight downloads. Never part of
/// the manifest and never garbage-collected by the sync engine.
pub const PARTIAL_DIR: &str = ".partial";

/// One locally present media file.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub path: PathBuf,
}

/// Scan the cache directory for supported media files, sorted by name.
///
/// Dotfiles and the partial-download directory are skipped, so a concurrent
/// fetch's temp files are never observed.
pub fn scan(cache_dir: &Path, supported_formats: &[String]) -> Vec<LocalEntry> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(cache_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || !is_supported(name, supported_formats) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            tracing::warn!("could not stat {}", path.display());
            continue;
        };
        entries.push(LocalEntry {
            name: name.to_string(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            path,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

fn is_supported(name: &str, supported_formats: &[String]) -> bool {
    let lower = name.to_ascii_lowercase();
    supported_formats
        .iter()
        .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
}
