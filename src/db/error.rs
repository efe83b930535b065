//! Typed store errors and the lock-contention retry policy.

use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

use super::jobs::JobStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database is locked: {0}")]
    Locked(#[source] rusqlite::Error),

    #[error("constraint violation: {0}")]
    Constraint(#[source] rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("invalid scan target name {0:?}")]
    InvalidTargetName(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Busy/locked failures are the only retryable class.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, StoreError::Locked(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Locked(err)
            }
            Some(ErrorCode::ConstraintViolation) => StoreError::Constraint(err),
            _ => StoreError::Sqlite(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fixed-delay retry for lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Run `op`, retrying only while it fails with lock contention.
    ///
    /// Any other error is returned on the first occurrence. When every attempt
    /// is exhausted the last lock error is logged and returned.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> StoreResult<T>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_lock_contention() && attempt < self.attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "Store locked, retrying"
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                Err(e) if e.is_lock_contention() => {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "Store still locked, abandoning operation"
                    );
                    return Err(e);
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;
    use std::cell::Cell;
    use std::time::Instant;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn test_error_classification() {
        assert!(StoreError::from(sqlite_failure(ffi::SQLITE_BUSY)).is_lock_contention());
        assert!(StoreError::from(sqlite_failure(ffi::SQLITE_LOCKED)).is_lock_contention());
        assert!(StoreError::from(sqlite_failure(ffi::SQLITE_CONSTRAINT)).is_constraint_violation());

        let other = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(!other.is_lock_contention());
        assert!(!other.is_constraint_violation());
    }

    #[test]
    fn test_succeeds_on_third_attempt_with_spacing() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0);
        let started = Instant::now();

        let result = policy.run("upsert", || {
            calls.set(calls.get() + 1);
            if calls.get() <= 2 {
                Err(StoreError::from(sqlite_failure(ffi::SQLITE_BUSY)))
            } else {
                Ok("written")
            }
        });

        assert_eq!(result.unwrap(), "written");
        assert_eq!(calls.get(), 3);
        // Two sleeps of ~500 ms between three attempts.
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = Cell::new(0);

        let result: StoreResult<()> = policy.run("upsert", || {
            calls.set(calls.get() + 1);
            Err(StoreError::from(sqlite_failure(ffi::SQLITE_BUSY)))
        });

        assert!(result.unwrap_err().is_lock_contention());
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = Cell::new(0);

        let result: StoreResult<()> = policy.run("upsert", || {
            calls.set(calls.get() + 1);
            Err(StoreError::from(sqlite_failure(ffi::SQLITE_CONSTRAINT)))
        });

        assert!(result.unwrap_err().is_constraint_violation());
        assert_eq!(calls.get(), 1);
    }
}
