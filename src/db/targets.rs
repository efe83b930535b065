//! Scan target rows.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{now_timestamp, Database, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Active,
    Inactive,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Active => "active",
            TargetStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TargetStatus::Active),
            "inactive" => Some(TargetStatus::Inactive),
            _ => None,
        }
    }
}

/// Fixed query forms for listing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFilter {
    All,
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub id: i64,
    pub top_folder: String,
    pub status: TargetStatus,
    pub last_scanned: Option<String>,
}

impl ScanTarget {
    pub fn is_active(&self) -> bool {
        self.status == TargetStatus::Active
    }
}

/// What `add_scan_target` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddTargetOutcome {
    Created,
    /// The target already existed and is now active.
    Reactivated,
}

fn row_to_scan_target(row: &Row) -> rusqlite::Result<ScanTarget> {
    let status: String = row.get(2)?;
    Ok(ScanTarget {
        id: row.get(0)?,
        top_folder: row.get(1)?,
        status: TargetStatus::from_str(&status).unwrap_or(TargetStatus::Inactive),
        last_scanned: row.get(3)?,
    })
}

impl Database {
    /// Register a target as active. An existing target is reactivated; the
    /// unique-constraint violation is logged and never surfaces.
    pub fn add_scan_target(&self, top_folder: &str) -> StoreResult<AddTargetOutcome> {
        let inserted = self.with_conn("add_scan_target", |conn| {
            match conn.execute(
                "INSERT INTO scan_targets (top_folder, status) VALUES (?, 'active')",
                [top_folder],
            ) {
                Ok(_) => Ok(true),
                Err(e) => {
                    let err = StoreError::from(e);
                    if err.is_constraint_violation() {
                        info!(top_folder, "Scan target already registered, reactivating");
                        Ok(false)
                    } else {
                        Err(err)
                    }
                }
            }
        })?;

        if inserted {
            return Ok(AddTargetOutcome::Created);
        }

        self.set_scan_target_status(top_folder, TargetStatus::Active)?;
        Ok(AddTargetOutcome::Reactivated)
    }

    pub fn get_scan_target(&self, top_folder: &str) -> StoreResult<Option<ScanTarget>> {
        use rusqlite::OptionalExtension;

        self.with_conn("get_scan_target", |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, top_folder, status, last_scanned FROM scan_targets WHERE top_folder = ?",
                    [top_folder],
                    row_to_scan_target,
                )
                .optional()?)
        })
    }

    /// Targets matching `filter`, ordered by name.
    pub fn list_scan_targets(&self, filter: TargetFilter) -> StoreResult<Vec<ScanTarget>> {
        let sql = match filter {
            TargetFilter::All => {
                "SELECT id, top_folder, status, last_scanned FROM scan_targets ORDER BY top_folder"
            }
            TargetFilter::Active => {
                "SELECT id, top_folder, status, last_scanned FROM scan_targets WHERE status = 'active' ORDER BY top_folder"
            }
            TargetFilter::Inactive => {
                "SELECT id, top_folder, status, last_scanned FROM scan_targets WHERE status = 'inactive' ORDER BY top_folder"
            }
        };

        self.with_conn("list_scan_targets", |conn| {
            let mut stmt = conn.prepare(sql)?;
            let targets = stmt
                .query_map([], row_to_scan_target)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(targets)
        })
    }

    /// Returns false if no such target exists. Setting the current status is a no-op.
    pub fn set_scan_target_status(&self, top_folder: &str, status: TargetStatus) -> StoreResult<bool> {
        self.with_conn("set_scan_target_status", |conn| {
            let updated = conn.execute(
                "UPDATE scan_targets SET status = ? WHERE top_folder = ?",
                params![status.as_str(), top_folder],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn set_last_scanned(&self, top_folder: &str) -> StoreResult<()> {
        let now = now_timestamp();
        self.with_conn("set_last_scanned", |conn| {
            conn.execute(
                "UPDATE scan_targets SET last_scanned = ? WHERE top_folder = ?",
                params![now, top_folder],
            )?;
            Ok(())
        })
    }

    /// Permanently delete a target row. File records are left to the reconciler.
    pub fn remove_scan_target(&self, top_folder: &str) -> StoreResult<bool> {
        self.with_conn("remove_scan_target", |conn| {
            let removed = conn.execute("DELETE FROM scan_targets WHERE top_folder = ?", [top_folder])?;
            Ok(removed > 0)
        })
    }
}
