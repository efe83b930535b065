//! Detailed probe pipeline.
//!
//! Picks indexed video files that have never been probed, runs the technical
//! probe on each, and stores the result. Every selected file is marked
//! attempted exactly once, whether the probe succeeded or not; failed files
//! are never retried automatically.

pub mod ffprobe;
pub mod report;

use glob::Pattern;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::CommandError;
use crate::config::ProbeConfig;
use crate::db::{Database, StoreResult};
use crate::progress::{Progress, ProgressEvent, ProgressSink};

pub use ffprobe::FfprobeProbe;
pub use report::{AudioStream, ProbeReport, SubtitleSummary, VideoStream};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("malformed probe output: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Malformed(err.to_string())
    }
}

/// Out-of-process extraction of stream-level metadata for one file.
pub trait TechnicalProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError>;
}

/// Counts from one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    /// Unprobed video records found before filtering.
    pub candidates: usize,
    /// Records excluded as platform sidecar files.
    pub sidecars: usize,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl ProbeStats {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct ProbePipeline<P: TechnicalProbe> {
    probe: P,
    video_types: Vec<String>,
    sidecars: Vec<Pattern>,
    batch_size: usize,
    progress_every: usize,
    progress: ProgressSink,
    cancel: Option<Arc<AtomicBool>>,
}

impl ProbePipeline<FfprobeProbe> {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(FfprobeProbe::from_config(config), config)
    }
}

impl<P: TechnicalProbe> ProbePipeline<P> {
    pub fn new(probe: P, config: &ProbeConfig) -> Self {
        let sidecars = config
            .sidecar_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid sidecar pattern");
                    None
                }
            })
            .collect();

        Self {
            probe,
            video_types: config
                .video_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            sidecars,
            batch_size: config.batch_size.max(1),
            progress_every: config.progress_every.max(1),
            progress: ProgressSink::headless(),
            cancel: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// True when the file name matches one of the sidecar patterns.
    pub fn is_sidecar(&self, path: &str) -> bool {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.sidecars.iter().any(|p| p.matches(&name))
    }

    /// Paths the next run would probe, in order.
    ///
    /// Sidecars are dropped before the batch limit is applied so they can
    /// never crowd real videos out of a batch.
    pub fn select(&self, db: &Database) -> StoreResult<(Vec<String>, ProbeStats)> {
        let candidates = db.list_unprobed_video_paths(&self.video_types)?;
        let mut stats = ProbeStats {
            candidates: candidates.len(),
            ..Default::default()
        };

        let batch: Vec<String> = candidates
            .into_iter()
            .filter(|path| {
                let sidecar = self.is_sidecar(path);
                if sidecar {
                    stats.sidecars += 1;
                }
                !sidecar
            })
            .take(self.batch_size)
            .collect();

        stats.selected = batch.len();
        Ok((batch, stats))
    }

    /// Probe one batch of unprobed video files.
    ///
    /// Only store failures are returned; probe failures are recorded on the
    /// file and counted.
    pub fn run(&self, db: &Database) -> StoreResult<ProbeStats> {
        let (batch, mut stats) = self.select(db)?;
        let total = batch.len();

        self.progress.send(ProgressEvent::Started { total });
        if total == 0 {
            debug!("No files waiting for a detailed probe");
            self.progress.send(ProgressEvent::Completed {
                succeeded: 0,
                failed: 0,
            });
            return Ok(stats);
        }

        info!(
            selected = total,
            candidates = stats.candidates,
            sidecars = stats.sidecars,
            "Starting detailed probe run"
        );

        for (index, path) in batch.iter().enumerate() {
            if self.is_cancelled() {
                info!(processed = stats.processed(), total, "Probe run cancelled");
                stats.cancelled = true;
                self.progress.send(ProgressEvent::Cancelled {
                    processed: stats.processed(),
                });
                return Ok(stats);
            }

            match self.probe.probe(Path::new(path)) {
                Ok(report) => {
                    db.update_detailed_metadata(path, &report)?;
                    debug!(
                        path = %path,
                        codec = ?report.video.as_ref().and_then(|v| v.codec.as_deref()),
                        resolution = ?report.resolution(),
                        "Stored probe result"
                    );
                    stats.succeeded += 1;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Probe failed, marking attempted");
                    db.mark_detailed_attempted(path)?;
                    stats.failed += 1;
                }
            }

            let processed = index + 1;
            if processed % self.progress_every == 0 || processed == total {
                self.progress.send(ProgressEvent::Progress(
                    Progress::new(processed, total).with_item(path.as_str()),
                ));
            }
        }

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Detailed probe run finished"
        );
        self.progress.send(ProgressEvent::Completed {
            succeeded: stats.succeeded,
            failed: stats.failed,
        });

        Ok(stats)
    }
}
