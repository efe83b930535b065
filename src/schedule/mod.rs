//! Crawl passes and the scan job state machine.
//!
//! A pass queues one job per active target, then drains pending jobs. Each
//! job is claimed with a conditional update, driven through recovery, crawl
//! and reconciliation, and always left in a terminal state.

use anyhow::Result;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{Database, JobStatus, ScanJob, StoreResult, SETTING_BASE_SCAN_PATH, SETTING_SMB_SERVER};
use crate::reconcile::{reconcile_target, ReconcileStats};
use crate::registry::Registry;
use crate::scanner::{CrawlStats, Crawler};
use crate::volume::{Reachability, VolumeRecovery};

/// Error message recorded on jobs whose target could not be mounted.
pub const UNREACHABLE_MESSAGE: &str = "volume unreachable";

/// Pause before the second and last attempt to record a job's final status.
const FINALIZE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        crawl: CrawlStats,
        reconcile: ReconcileStats,
        recovered: bool,
    },
    /// The target was skipped for this pass; no records were touched.
    Unreachable,
    /// The target was deactivated or removed after the job was queued.
    Inactive,
    Cancelled,
    Failed(String),
    /// Another worker claimed the job first.
    NotClaimed,
}

impl JobOutcome {
    fn terminal_status(&self) -> Option<(JobStatus, Option<String>)> {
        match self {
            JobOutcome::Completed { .. } => Some((JobStatus::Completed, None)),
            JobOutcome::Unreachable => Some((JobStatus::Failed, Some(UNREACHABLE_MESSAGE.to_string()))),
            JobOutcome::Inactive => Some((JobStatus::Failed, Some("target inactive".to_string()))),
            JobOutcome::Cancelled => Some((JobStatus::Failed, Some("cancelled".to_string()))),
            JobOutcome::Failed(message) => Some((JobStatus::Failed, Some(message.clone()))),
            JobOutcome::NotClaimed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: i64,
    pub top_folder: String,
    pub outcome: JobOutcome,
}

/// Summary of one crawl pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub queued: usize,
    pub jobs: Vec<JobReport>,
}

impl PassReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Completed { .. }))
    }

    pub fn unreachable(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Unreachable))
    }

    /// Jobs that ended `failed` for any reason other than an unreachable volume.
    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                JobOutcome::Failed(_) | JobOutcome::Inactive | JobOutcome::Cancelled
            )
        })
    }

    pub fn files_written(&self) -> usize {
        self.jobs
            .iter()
            .map(|j| match &j.outcome {
                JobOutcome::Completed { crawl, .. } => crawl.writes(),
                _ => 0,
            })
            .sum()
    }

    pub fn files_removed(&self) -> usize {
        self.jobs
            .iter()
            .map(|j| match &j.outcome {
                JobOutcome::Completed { reconcile, .. } => reconcile.removed,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.jobs.iter().filter(|j| pred(&j.outcome)).count()
    }
}

/// Directory targets are mounted under: the `base_scan_path` setting when
/// set, otherwise the configured default.
pub fn resolve_base_path(db: &Database, config: &Config) -> StoreResult<PathBuf> {
    Ok(db
        .get_setting(SETTING_BASE_SCAN_PATH)?
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| config.scanner.base_path.clone()))
}

/// Server identity for remounts: the `smb_server` setting, then the config file.
pub fn resolve_server(db: &Database, config: &Config) -> StoreResult<Option<String>> {
    Ok(db
        .get_setting(SETTING_SMB_SERVER)?
        .filter(|s| !s.trim().is_empty())
        .or_else(|| config.recovery.server.clone()))
}

pub struct Scheduler<'a> {
    db: &'a Database,
    crawler: Crawler,
    recovery: VolumeRecovery,
    server: Option<String>,
    parallel: bool,
    cancel: Option<Arc<AtomicBool>>,
    finalize_retry: Duration,
}

impl<'a> Scheduler<'a> {
    pub fn new(db: &'a Database, crawler: Crawler, recovery: VolumeRecovery) -> Self {
        Self {
            db,
            crawler,
            recovery,
            server: None,
            parallel: false,
            cancel: None,
            finalize_retry: FINALIZE_RETRY_DELAY,
        }
    }

    /// Build a scheduler from the config file and the settings stored in `db`.
    pub fn from_config(db: &'a Database, config: &Config, cancel: Arc<AtomicBool>) -> Result<Self> {
        let base_path = resolve_base_path(db, config)?;
        let server = resolve_server(db, config)?;
        let crawler = Crawler::new(base_path).with_cancel_flag(cancel.clone());

        Ok(Self::new(db, crawler, VolumeRecovery::from_config(&config.recovery))
            .with_server(server)
            .with_parallel(config.scanner.parallel_targets)
            .with_cancel_flag(cancel))
    }

    pub fn with_server(mut self, server: Option<String>) -> Self {
        self.server = server;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_finalize_retry(mut self, delay: Duration) -> Self {
        self.finalize_retry = delay;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Queue a pending job for every active target that has none.
    pub fn enqueue_active_targets(&self) -> StoreResult<usize> {
        let mut queued = 0;
        for target in Registry::new(self.db).list_active()? {
            if self.db.pending_job_for(&target.top_folder)?.is_some() {
                continue;
            }
            let id = self.db.create_job(&target.top_folder)?;
            info!(job_id = id, top_folder = %target.top_folder, "Queued scan job");
            queued += 1;
        }
        Ok(queued)
    }

    /// One full pass: queue jobs for active targets, then run every pending job.
    ///
    /// Only a failure to read or create jobs aborts the pass. Everything that
    /// goes wrong inside a job is contained to that job.
    pub fn run_pass(&self) -> StoreResult<PassReport> {
        let queued = self.enqueue_active_targets()?;
        let pending = self.db.list_pending_jobs()?;
        info!(queued, pending = pending.len(), parallel = self.parallel, "Starting crawl pass");

        let jobs: Vec<JobReport> = if self.parallel {
            pending.par_iter().map(|job| self.run_job(job)).collect()
        } else {
            pending.iter().map(|job| self.run_job(job)).collect()
        };

        let report = PassReport { queued, jobs };
        info!(
            completed = report.completed(),
            unreachable = report.unreachable(),
            failed = report.failed(),
            written = report.files_written(),
            removed = report.files_removed(),
            "Crawl pass finished"
        );
        Ok(report)
    }

    /// Claim and run one job, leaving it in a terminal state.
    pub fn run_job(&self, job: &ScanJob) -> JobReport {
        let report = |outcome| JobReport {
            job_id: job.id,
            top_folder: job.top_folder.clone(),
            outcome,
        };

        match self.db.claim_job(job.id) {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = job.id, "Job already claimed elsewhere");
                return report(JobOutcome::NotClaimed);
            }
            Err(e) => {
                // Still pending; the next pass picks it up.
                error!(job_id = job.id, error = %e, "Failed to claim job");
                return report(JobOutcome::NotClaimed);
            }
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.execute(&job.top_folder))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(job_id = job.id, top_folder = %job.top_folder, error = %e, "Scan job failed");
                JobOutcome::Failed(format!("{:#}", e))
            }
            Err(_) => {
                error!(job_id = job.id, top_folder = %job.top_folder, "Scan job panicked");
                JobOutcome::Failed("crawl panicked".to_string())
            }
        };

        if let Some((status, message)) = outcome.terminal_status() {
            if self.finalize(job.id, status, message.as_deref()) {
                info!(job_id = job.id, top_folder = %job.top_folder, status = %status, "Scan job finished");
            }
        }

        report(outcome)
    }

    /// Record a terminal status, trying once more after a pause if the store
    /// is still locked once its own retries are spent.
    fn finalize(&self, job_id: i64, status: JobStatus, message: Option<&str>) -> bool {
        match self.db.set_job_status(job_id, status, message) {
            Ok(()) => return true,
            Err(e) if e.is_lock_contention() => {
                warn!(job_id, status = %status, error = %e, "Store locked while finalizing job, retrying");
                thread::sleep(self.finalize_retry);
            }
            Err(e) => {
                error!(job_id, status = %status, error = %e, "Failed to finalize job");
                return false;
            }
        }

        match self.db.set_job_status(job_id, status, message) {
            Ok(()) => true,
            Err(e) => {
                error!(job_id, status = %status, error = %e, "Failed to finalize job, left in progress");
                false
            }
        }
    }

    fn execute(&self, top_folder: &str) -> Result<JobOutcome> {
        if self.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let registry = Registry::new(self.db);
        if !registry.is_active(top_folder)? {
            return Ok(JobOutcome::Inactive);
        }

        let root = self.crawler.target_root(top_folder);
        let reachability = self
            .recovery
            .ensure_reachable(&root, top_folder, self.server.as_deref());
        if !reachability.is_reachable() {
            return Ok(JobOutcome::Unreachable);
        }

        let crawl = self.crawler.crawl(self.db, top_folder)?;
        if crawl.cancelled {
            return Ok(JobOutcome::Cancelled);
        }

        let reconcile = reconcile_target(self.db, top_folder, &root)?;
        registry.touch(top_folder)?;

        Ok(JobOutcome::Completed {
            crawl,
            reconcile,
            recovered: reachability == Reachability::Recovered,
        })
    }
}
