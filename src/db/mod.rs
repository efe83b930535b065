mod error;
mod schema;
pub mod files;
pub mod jobs;
pub mod settings;
pub mod targets;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use error::{RetryPolicy, StoreError, StoreResult};
pub use files::{FileRecord, FileSignature, NewFileRecord};
pub use jobs::{JobFilter, JobStatus, ScanJob};
pub use schema::{latest_version, SCHEMA};
pub use settings::{SETTING_BASE_SCAN_PATH, SETTING_SMB_SERVER};
pub use targets::{AddTargetOutcome, ScanTarget, TargetFilter, TargetStatus};

use crate::config::StoreConfig;

/// Timestamp format for every TEXT time column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn now_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Shared handle to the metadata store.
///
/// Wraps a pool of SQLite connections in WAL mode. Every operation checks a
/// connection out for the duration of one statement or transaction; the
/// connection goes back to the pool when the guard drops, on success or error.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    retry: RetryPolicy,
}

impl Database {
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = config.busy_timeout();
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)?;

        debug!(path = %path.display(), pool_size = config.pool_size, "Opened metadata store");

        Ok(Self {
            pool,
            retry: RetryPolicy::new(config.lock_retry_attempts, config.lock_retry_delay()),
        })
    }

    /// Bring the schema up to date. Safe to call on every startup.
    pub fn initialize(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        for migration in schema::MIGRATIONS.iter().filter(|m| m.version > current) {
            let tx = conn.transaction()?;
            (migration.apply)(&tx)?;
            tx.pragma_update(None, "user_version", migration.version)?;
            tx.commit()?;
            info!(
                version = migration.version,
                description = migration.description,
                "Applied schema migration"
            );
        }

        Ok(())
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Check out a connection and run `op`, retrying on lock contention.
    fn with_conn<T, F>(&self, operation: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut(&mut Connection) -> StoreResult<T>,
    {
        self.retry.run(operation, || {
            let mut conn = self.conn()?;
            op(&mut conn)
        })
    }
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let (_dir, db) = test_support::open_temp();
        assert_eq!(db.schema_version().unwrap(), latest_version());

        db.initialize().unwrap();
        assert_eq!(db.schema_version().unwrap(), latest_version());
    }

    #[test]
    fn test_connections_run_in_wal_mode() {
        let (_dir, db) = test_support::open_temp();
        let conn = db.conn().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    const LEGACY_TABLES: &str = r#"
        CREATE TABLE ScanTargets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            top_folder TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            last_scanned TIMESTAMP DEFAULT NULL
        );
        CREATE TABLE FileRecords (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            file_type TEXT,
            file_path TEXT NOT NULL UNIQUE,
            file_size INTEGER,
            file_modified TEXT,
            last_scanned TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            top_folder TEXT
        );
        CREATE TABLE Settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT UNIQUE NOT NULL,
            value TEXT NOT NULL
        );
    "#;

    #[test]
    fn test_legacy_tables_are_imported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(LEGACY_TABLES).unwrap();
            conn.execute_batch(
                r#"
                INSERT INTO ScanTargets (top_folder, status) VALUES ('Movies', 'active');
                INSERT INTO ScanTargets (top_folder, status) VALUES ('TV', 'inactive');
                INSERT INTO FileRecords (file_name, file_type, file_path, file_size, file_modified, top_folder)
                    VALUES ('A.mkv', '.mkv', '/Volumes/Movies/A.mkv', 10, 'Mon Jan  1 00:00:00 2024', 'Movies');
                INSERT INTO Settings (key, value) VALUES ('smb_server', 'nas.local');
                "#,
            )
            .unwrap();
        }

        let db = Database::open(&path, &StoreConfig::default()).unwrap();
        db.initialize().unwrap();

        let targets = db.list_scan_targets(TargetFilter::All).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(db.list_scan_targets(TargetFilter::Active).unwrap().len(), 1);
        assert!(db.get_file_record("/Volumes/Movies/A.mkv").unwrap().is_some());
        assert_eq!(
            db.get_setting(SETTING_SMB_SERVER).unwrap().as_deref(),
            Some("nas.local")
        );
    }

    #[test]
    fn test_imported_records_without_target_are_reconciled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media/Movies");
        std::fs::create_dir_all(&root).unwrap();
        let kept = root.join("kept.mkv");
        std::fs::write(&kept, b"k").unwrap();
        let gone = root.join("gone.mkv");

        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(LEGACY_TABLES).unwrap();
            conn.execute("INSERT INTO ScanTargets (top_folder) VALUES ('Movies')", [])
                .unwrap();
            for file in [&kept, &gone] {
                conn.execute(
                    "INSERT INTO FileRecords (file_name, file_path, file_size) VALUES (?1, ?2, 1)",
                    rusqlite::params![
                        file.file_name().unwrap().to_string_lossy(),
                        file.to_string_lossy()
                    ],
                )
                .unwrap();
            }
        }

        let db = Database::open(&path, &StoreConfig::default()).unwrap();
        db.initialize().unwrap();
        assert!(db.list_file_paths_under("Movies").unwrap().is_empty());

        let stats = crate::reconcile::reconcile_target(&db, "Movies", &root).unwrap();
        assert_eq!(stats.removed, 1);
        assert!(db.get_file_record(&gone.to_string_lossy()).unwrap().is_none());
        let adopted = db.get_file_record(&kept.to_string_lossy()).unwrap().unwrap();
        assert_eq!(adopted.top_folder.as_deref(), Some("Movies"));
    }
}
