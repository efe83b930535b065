//! Scan job records and their status transitions.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{now_timestamp, Database, StoreError, StoreResult, TIMESTAMP_FORMAT};

/// Status of a scan job. Moves strictly `Pending -> InProgress -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The only status a job may hold immediately before entering `self`.
    /// `Pending` has none: jobs are created pending and never return to it.
    pub fn predecessor(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => None,
            JobStatus::InProgress => Some(JobStatus::Pending),
            JobStatus::Completed | JobStatus::Failed => Some(JobStatus::InProgress),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed query forms for listing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFilter {
    All,
    /// Pending or in progress.
    Open,
    Status(JobStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub id: i64,
    pub top_folder: String,
    pub status: JobStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

const JOB_COLUMNS: &str =
    "id, top_folder, status, created_at, started_at, completed_at, error_message";

fn row_to_scan_job(row: &Row) -> rusqlite::Result<ScanJob> {
    let status: String = row.get(2)?;
    Ok(ScanJob {
        id: row.get(0)?,
        top_folder: row.get(1)?,
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        created_at: row.get(3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        error_message: row.get(6)?,
    })
}

impl Database {
    /// Create a pending job for one target and return its id.
    pub fn create_job(&self, top_folder: &str) -> StoreResult<i64> {
        let now = now_timestamp();
        self.with_conn("create_job", |conn| {
            conn.execute(
                "INSERT INTO scan_jobs (top_folder, status, created_at) VALUES (?, 'pending', ?)",
                params![top_folder, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Atomically move a job from pending to in progress.
    ///
    /// Returns false when the job was no longer pending, i.e. another worker
    /// claimed it first.
    pub fn claim_job(&self, id: i64) -> StoreResult<bool> {
        let now = now_timestamp();
        self.with_conn("claim_job", |conn| {
            let claimed = conn.execute(
                "UPDATE scan_jobs SET status = 'in_progress', started_at = ? WHERE id = ? AND status = 'pending'",
                params![now, id],
            )?;
            Ok(claimed == 1)
        })
    }

    /// Apply a forward transition. The update is conditional on the job
    /// still holding the legal predecessor status, so terminal jobs never change.
    pub fn set_job_status(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let now = now_timestamp();
        let from = status.predecessor();

        let updated = self.with_conn("set_job_status", |conn| {
            let rows = match (status, from) {
                (_, None) => 0,
                (JobStatus::InProgress, Some(from)) => conn.execute(
                    "UPDATE scan_jobs SET status = ?, started_at = ? WHERE id = ? AND status = ?",
                    params![status.as_str(), now, id, from.as_str()],
                )?,
                (_, Some(from)) => conn.execute(
                    "UPDATE scan_jobs SET status = ?, completed_at = ?, error_message = ? WHERE id = ? AND status = ?",
                    params![status.as_str(), now, error_message, id, from.as_str()],
                )?,
            };
            Ok(rows)
        })?;

        if updated == 1 {
            return Ok(());
        }

        match self.get_job(id)? {
            Some(job) => Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: status,
            }),
            None => Err(StoreError::JobNotFound(id)),
        }
    }

    pub fn get_job(&self, id: i64) -> StoreResult<Option<ScanJob>> {
        let sql = format!("SELECT {} FROM scan_jobs WHERE id = ?", JOB_COLUMNS);
        self.with_conn("get_job", |conn| {
            Ok(conn.query_row(&sql, [id], row_to_scan_job).optional()?)
        })
    }

    /// Oldest pending job for a target, if any.
    pub fn pending_job_for(&self, top_folder: &str) -> StoreResult<Option<ScanJob>> {
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE top_folder = ? AND status = 'pending' ORDER BY id LIMIT 1",
            JOB_COLUMNS
        );
        self.with_conn("pending_job_for", |conn| {
            Ok(conn.query_row(&sql, [top_folder], row_to_scan_job).optional()?)
        })
    }

    /// Jobs matching `filter`, newest first.
    pub fn list_jobs(&self, filter: JobFilter, limit: usize) -> StoreResult<Vec<ScanJob>> {
        let limit = limit as i64;
        self.with_conn("list_jobs", |conn| {
            let jobs = match filter {
                JobFilter::All => {
                    let sql = format!("SELECT {} FROM scan_jobs ORDER BY id DESC LIMIT ?", JOB_COLUMNS);
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map([limit], row_to_scan_job)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                JobFilter::Open => {
                    let sql = format!(
                        "SELECT {} FROM scan_jobs WHERE status IN ('pending', 'in_progress') ORDER BY id DESC LIMIT ?",
                        JOB_COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map([limit], row_to_scan_job)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                JobFilter::Status(status) => {
                    let sql = format!(
                        "SELECT {} FROM scan_jobs WHERE status = ? ORDER BY id DESC LIMIT ?",
                        JOB_COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params![status.as_str(), limit], row_to_scan_job)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(jobs)
        })
    }

    /// Pending jobs in creation order, for the scheduler to drain.
    pub fn list_pending_jobs(&self) -> StoreResult<Vec<ScanJob>> {
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE status = 'pending' ORDER BY id",
            JOB_COLUMNS
        );
        self.with_conn("list_pending_jobs", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_scan_job)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Fail jobs that have been in progress for longer than `older_than`.
    ///
    /// A crashed worker leaves its job in progress forever; this is how such
    /// jobs still reach a terminal state. Returns the number of jobs failed.
    pub fn fail_abandoned_jobs(&self, older_than: Duration) -> StoreResult<usize> {
        let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = chrono::Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let now = now_timestamp();

        self.with_conn("fail_abandoned_jobs", |conn| {
            Ok(conn.execute(
                r#"
                UPDATE scan_jobs
                SET status = 'failed', completed_at = ?, error_message = 'abandoned'
                WHERE status = 'in_progress' AND (started_at IS NULL OR started_at <= ?)
                "#,
                params![now, cutoff],
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_str("running"), None);
    }

    #[test]
    fn test_new_job_is_pending() {
        let (_dir, db) = open_temp();
        let id = db.create_job("Movies").unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.top_folder, "Movies");
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_claim_succeeds_exactly_once() {
        let (_dir, db) = open_temp();
        let id = db.create_job("Movies").unwrap();

        assert!(db.claim_job(id).unwrap());
        assert!(!db.claim_job(id).unwrap());

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let (_dir, db) = open_temp();
        let db = std::sync::Arc::new(db);
        let id = db.create_job("Movies").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.claim_job(id).unwrap())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let (_dir, db) = open_temp();
        let id = db.create_job("Movies").unwrap();
        db.claim_job(id).unwrap();
        db.set_job_status(id, JobStatus::Completed, None).unwrap();

        let err = db.set_job_status(id, JobStatus::Failed, Some("late")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed,
                ..
            }
        ));
        assert!(!db.claim_job(id).unwrap());
        assert_eq!(db.get_job(id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_pending_cannot_skip_to_terminal() {
        let (_dir, db) = open_temp();
        let id = db.create_job("Movies").unwrap();

        assert!(db.set_job_status(id, JobStatus::Completed, None).is_err());
        assert!(db.set_job_status(id, JobStatus::Pending, None).is_err());
        assert_eq!(db.get_job(id).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_unknown_job_is_reported() {
        let (_dir, db) = open_temp();
        let err = db.set_job_status(42, JobStatus::InProgress, None).unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(42)));
    }

    #[test]
    fn test_failed_job_keeps_error_message() {
        let (_dir, db) = open_temp();
        let id = db.create_job("TV").unwrap();
        db.claim_job(id).unwrap();
        db.set_job_status(id, JobStatus::Failed, Some("volume unreachable")).unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("volume unreachable"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_list_filters() {
        let (_dir, db) = open_temp();
        let a = db.create_job("A").unwrap();
        let b = db.create_job("B").unwrap();
        db.create_job("C").unwrap();
        db.claim_job(a).unwrap();
        db.set_job_status(a, JobStatus::Completed, None).unwrap();
        db.claim_job(b).unwrap();

        assert_eq!(db.list_jobs(JobFilter::All, 10).unwrap().len(), 3);
        assert_eq!(db.list_jobs(JobFilter::Open, 10).unwrap().len(), 2);
        let completed = db.list_jobs(JobFilter::Status(JobStatus::Completed), 10).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a);
        assert_eq!(db.list_pending_jobs().unwrap().len(), 1);
        assert_eq!(db.pending_job_for("C").unwrap().map(|j| j.top_folder), Some("C".to_string()));
        assert!(db.pending_job_for("A").unwrap().is_none());
    }

    #[test]
    fn test_abandoned_jobs_fail_after_threshold() {
        let (_dir, db) = open_temp();
        let id = db.create_job("Movies").unwrap();
        db.claim_job(id).unwrap();

        assert_eq!(db.fail_abandoned_jobs(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(db.fail_abandoned_jobs(Duration::ZERO).unwrap(), 1);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("abandoned"));
    }
}
