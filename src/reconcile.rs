//! Removal of records whose files are gone from disk.
//!
//! Only ever called for a target confirmed reachable in the current pass.
//! The root is checked again right before deleting so that a volume that
//! dropped out after the crawl does not look like a mass deletion.

use anyhow::Result;
use std::path::{Path, MAIN_SEPARATOR};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::volume::is_mounted;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub checked: usize,
    pub removed: usize,
    /// The root disappeared before deletion started; nothing was removed.
    pub aborted: bool,
}

/// Delete every record under `top_folder` whose path no longer exists.
///
/// Records without a target whose path lies under `root` are claimed for
/// `top_folder` first, so they are checked too.
pub fn reconcile_target(db: &Database, top_folder: &str, root: &Path) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();

    if !is_mounted(root) {
        warn!(
            top_folder,
            root = %root.display(),
            "Target root vanished before reconciliation, keeping records"
        );
        stats.aborted = true;
        return Ok(stats);
    }

    if let Some(prefix) = root_prefix(root) {
        let adopted = db.adopt_untargeted_records(top_folder, &prefix)?;
        if adopted > 0 {
            info!(top_folder, adopted, "Assigned untargeted records to target");
        }
    }

    let paths = db.list_file_paths_under(top_folder)?;
    stats.checked = paths.len();

    for path in &paths {
        match Path::new(path).try_exists() {
            Ok(true) => {}
            Ok(false) => {
                if db.delete_file_record(path)? {
                    debug!(path = %path, "Removed record for deleted file");
                    stats.removed += 1;
                }
            }
            Err(e) => {
                // Existence unknown; keep the record.
                warn!(path = %path, error = %e, "Could not check file existence");
            }
        }
    }

    if stats.removed > 0 {
        info!(top_folder, removed = stats.removed, checked = stats.checked, "Reconciled deleted files");
    }

    Ok(stats)
}

/// `root` as stored-path text with a trailing separator.
fn root_prefix(root: &Path) -> Option<String> {
    let root = root.to_str()?.trim_end_matches(MAIN_SEPARATOR);
    Some(format!("{root}{MAIN_SEPARATOR}"))
}
