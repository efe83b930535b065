pub mod change_detection;
pub mod discovery;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{Database, NewFileRecord};

pub use change_detection::{Change, KnownFiles};
pub use discovery::{file_type_of, format_mtime, top_folder_of, FileDescriptor, FileWalker};

/// Counts from crawling one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub seen: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl CrawlStats {
    /// Upserts issued during the crawl.
    pub fn writes(&self) -> usize {
        self.new + self.updated
    }
}

/// Walks target roots under a base path and upserts new or changed files.
///
/// Crawls of different targets share nothing but the store, so one crawler
/// can be used from several threads at once.
pub struct Crawler {
    base_path: PathBuf,
    cancel: Option<Arc<AtomicBool>>,
}

impl Crawler {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory a target's files live under.
    pub fn target_root(&self, top_folder: &str) -> PathBuf {
        self.base_path.join(top_folder)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Crawl one target. The caller has already confirmed the root is reachable.
    ///
    /// Unreadable entries are skipped with a warning. A store failure aborts
    /// the crawl; records written before it stay committed.
    pub fn crawl(&self, db: &Database, top_folder: &str) -> Result<CrawlStats> {
        let root = self.target_root(top_folder);
        let known = KnownFiles::new(db.file_signatures_under(top_folder)?);
        debug!(top_folder, known = known.len(), "Loaded stored signatures");

        let mut stats = CrawlStats::default();

        for item in FileWalker::new(&root).files() {
            if self.is_cancelled() {
                info!(top_folder, seen = stats.seen, "Crawl cancelled");
                stats.cancelled = true;
                break;
            }

            let file = match item {
                Ok(file) => file,
                Err(skip) => {
                    warn!(
                        top_folder,
                        path = ?skip.path,
                        reason = %skip.reason,
                        "Skipping unreadable entry"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            stats.seen += 1;
            let change = known.classify(&file);
            match change {
                Change::Unchanged => {
                    stats.unchanged += 1;
                    continue;
                }
                Change::New => stats.new += 1,
                Change::Modified => stats.updated += 1,
            }

            db.upsert_file_record(&self.record_for(&file, top_folder))?;
        }

        info!(
            top_folder,
            seen = stats.seen,
            new = stats.new,
            updated = stats.updated,
            unchanged = stats.unchanged,
            skipped = stats.skipped,
            "Crawl finished"
        );

        Ok(stats)
    }

    fn record_for(&self, file: &FileDescriptor, top_folder: &str) -> NewFileRecord {
        NewFileRecord {
            file_path: file.path_string(),
            file_name: file.name.clone(),
            file_type: file.file_type.clone(),
            file_size: file.size,
            file_modified: file.modified.clone(),
            top_folder: top_folder_of(&file.path, &self.base_path)
                .or_else(|| Some(top_folder.to_string())),
        }
    }
}
