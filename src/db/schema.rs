//! Finalized schema and the versioned migrations that produce it.
//!
//! `PRAGMA user_version` records the last applied migration. Each migration
//! runs once, inside its own transaction, at startup.

use rusqlite::Transaction;

pub const SCHEMA: &str = r#"
-- Registered top-level folders (usually one mounted share each)
CREATE TABLE IF NOT EXISTS scan_targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    top_folder TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
    last_scanned TEXT
);

-- One row per file on disk, keyed by absolute path
CREATE TABLE IF NOT EXISTS file_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    file_name TEXT NOT NULL,
    file_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_modified TEXT NOT NULL,
    last_scanned TEXT NOT NULL,
    top_folder TEXT,

    -- Detailed probe results
    detailed_scan_attempted INTEGER NOT NULL DEFAULT 0,
    detailed_scanned_at TEXT,
    container_format TEXT,
    duration_secs REAL,
    probe_score INTEGER,
    video_codec TEXT,
    video_width INTEGER,
    video_height INTEGER,
    frame_rate REAL,
    video_bitrate INTEGER,
    bit_depth INTEGER,
    color_primaries TEXT,
    color_transfer TEXT,
    audio_codec TEXT,
    audio_channels INTEGER,
    audio_sample_rate INTEGER,
    audio_bitrate INTEGER,
    audio_languages TEXT,      -- JSON array
    subtitle_count INTEGER,
    subtitle_languages TEXT    -- JSON array
);

CREATE INDEX IF NOT EXISTS idx_file_records_top_folder ON file_records(top_folder);
CREATE INDEX IF NOT EXISTS idx_file_records_unprobed
    ON file_records(detailed_scan_attempted, file_type);

-- Crawl jobs, one per target per pass
CREATE TABLE IF NOT EXISTS scan_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    top_folder TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_jobs_status ON scan_jobs(status);

-- Flat key/value settings
CREATE TABLE IF NOT EXISTS app_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub apply: fn(&Transaction) -> rusqlite::Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create schema",
        apply: create_schema,
    },
    Migration {
        version: 2,
        description: "import legacy crawler tables",
        apply: import_legacy_tables,
    },
];

/// Version the database ends up at once every migration has run.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn create_schema(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(SCHEMA)
}

/// Copy rows from the tables written by earlier crawler releases
/// (`ScanTargets`, `FileRecords`, `Settings`) when they exist.
///
/// Legacy `file_modified` values use a different timestamp format, so those
/// files are simply rewritten on the next crawl.
fn import_legacy_tables(tx: &Transaction) -> rusqlite::Result<()> {
    let has_table = |name: &str| -> rusqlite::Result<bool> {
        tx.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
    };

    if has_table("ScanTargets")? {
        tx.execute(
            r#"
            INSERT OR IGNORE INTO scan_targets (top_folder, status, last_scanned)
            SELECT top_folder,
                   CASE WHEN status = 'inactive' THEN 'inactive' ELSE 'active' END,
                   last_scanned
            FROM ScanTargets
            "#,
            [],
        )?;
    }

    if has_table("FileRecords")? {
        tx.execute(
            r#"
            INSERT OR IGNORE INTO file_records (
                file_path, file_name, file_type, file_size, file_modified, last_scanned, top_folder
            )
            SELECT file_path, file_name, COALESCE(file_type, 'unknown'), COALESCE(file_size, 0),
                   COALESCE(file_modified, ''), COALESCE(last_scanned, ''), top_folder
            FROM FileRecords
            "#,
            [],
        )?;
    }

    if has_table("Settings")? {
        tx.execute(
            "INSERT OR IGNORE INTO app_settings (key, value) SELECT key, value FROM Settings",
            [],
        )?;
    }

    Ok(())
}
