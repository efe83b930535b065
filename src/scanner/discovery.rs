use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::db::TIMESTAMP_FORMAT;

/// One regular file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: String,
    pub file_type: String,
}

impl FileDescriptor {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// An entry the walk could not read.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub path: Option<PathBuf>,
    pub reason: String,
}

/// Recursive walk of one target root.
///
/// Each call to [`FileWalker::files`] starts a fresh traversal, so an
/// interrupted walk is restarted simply by calling it again.
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily yield every regular file below the root, in name order.
    /// Symlinks are not followed.
    pub fn files(&self) -> impl Iterator<Item = Result<FileDescriptor, SkippedEntry>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(describe(entry.path())),
                Ok(_) => None,
                Err(e) => Some(Err(SkippedEntry {
                    path: e.path().map(Path::to_path_buf),
                    reason: e.to_string(),
                })),
            })
    }
}

fn describe(path: &Path) -> Result<FileDescriptor, SkippedEntry> {
    // Paths are stored as text; a lossy copy would never match the file again.
    if path.to_str().is_none() {
        return Err(SkippedEntry {
            path: Some(path.to_path_buf()),
            reason: "non-UTF-8 path".to_string(),
        });
    }

    // Stat again: the file may have vanished since the directory was read.
    let metadata = std::fs::metadata(path).map_err(|e| SkippedEntry {
        path: Some(path.to_path_buf()),
        reason: e.to_string(),
    })?;
    let modified = metadata.modified().map_err(|e| SkippedEntry {
        path: Some(path.to_path_buf()),
        reason: e.to_string(),
    })?;

    Ok(FileDescriptor {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size: metadata.len(),
        modified: format_mtime(modified),
        file_type: file_type_of(path),
    })
}

/// Modification time in the store's timestamp format, UTC, whole seconds.
pub fn format_mtime(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format(TIMESTAMP_FORMAT).to_string()
}

/// Lowercased extension with its leading dot, or `"unknown"`.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// First path component below `base`, i.e. the target a file belongs to.
pub fn top_folder_of(path: &Path, base: &Path) -> Option<String> {
    match path.strip_prefix(base).ok()?.components().next()? {
        Component::Normal(name) => Some(name.to_string_lossy().to_string()),
        _ => None,
    }
}
