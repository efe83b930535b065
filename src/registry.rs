//! The set of crawlable roots and their active/inactive status.

use tracing::info;

use crate::db::{
    AddTargetOutcome, Database, ScanTarget, StoreError, StoreResult, TargetFilter, TargetStatus,
};

pub struct Registry<'a> {
    db: &'a Database,
}

impl<'a> Registry<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Register `name` as active. Adding an existing target reactivates it.
    ///
    /// Names are trimmed; a name must be a single path component.
    pub fn add(&self, name: &str) -> StoreResult<AddTargetOutcome> {
        let name = name.trim();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(StoreError::InvalidTargetName(name.to_string()));
        }

        let outcome = self.db.add_scan_target(name)?;
        info!(top_folder = name, ?outcome, "Registered scan target");
        Ok(outcome)
    }

    pub fn list_all(&self) -> StoreResult<Vec<ScanTarget>> {
        self.db.list_scan_targets(TargetFilter::All)
    }

    /// The targets a crawl pass works on.
    pub fn list_active(&self) -> StoreResult<Vec<ScanTarget>> {
        self.db.list_scan_targets(TargetFilter::Active)
    }

    pub fn is_active(&self, name: &str) -> StoreResult<bool> {
        Ok(self
            .db
            .get_scan_target(name)?
            .map(|t| t.is_active())
            .unwrap_or(false))
    }

    /// Returns false if the target is not registered.
    pub fn set_status(&self, name: &str, status: TargetStatus) -> StoreResult<bool> {
        let found = self.db.set_scan_target_status(name, status)?;
        if found {
            info!(top_folder = name, status = status.as_str(), "Scan target status set");
        }
        Ok(found)
    }

    /// Permanently forget a target. Its file records are not touched.
    pub fn remove(&self, name: &str) -> StoreResult<bool> {
        let removed = self.db.remove_scan_target(name)?;
        if removed {
            info!(top_folder = name, "Removed scan target");
        }
        Ok(removed)
    }

    /// Record a finished crawl of `name`.
    pub fn touch(&self, name: &str) -> StoreResult<()> {
        self.db.set_last_scanned(name)
    }
}
