//! File record operations. `file_path` is the only identity; every write is
//! an upsert or an update keyed on it.

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashMap;

use super::{now_timestamp, Database, StoreResult};
use crate::probe::ProbeReport;

/// Core fields written by the crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_modified: String,
    pub top_folder: Option<String>,
}

/// The two values change detection compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSignature {
    pub file_size: u64,
    pub file_modified: String,
}

/// A stored file record, including any detailed probe results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_modified: String,
    pub last_scanned: String,
    pub top_folder: Option<String>,
    pub detailed_scan_attempted: bool,
    pub detailed_scanned_at: Option<String>,
    pub container_format: Option<String>,
    pub duration_secs: Option<f64>,
    pub probe_score: Option<i64>,
    pub video_codec: Option<String>,
    pub video_width: Option<i64>,
    pub video_height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub video_bitrate: Option<i64>,
    pub bit_depth: Option<i64>,
    pub color_primaries: Option<String>,
    pub color_transfer: Option<String>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_sample_rate: Option<i64>,
    pub audio_bitrate: Option<i64>,
    pub audio_languages: Vec<String>,
    pub subtitle_count: Option<i64>,
    pub subtitle_languages: Vec<String>,
}

impl FileRecord {
    pub fn signature(&self) -> FileSignature {
        FileSignature {
            file_size: self.file_size,
            file_modified: self.file_modified.clone(),
        }
    }

    /// True once any technical field has been filled in by a probe.
    pub fn has_technical_metadata(&self) -> bool {
        self.container_format.is_some()
            || self.duration_secs.is_some()
            || self.video_codec.is_some()
            || self.audio_codec.is_some()
            || self.subtitle_count.is_some()
    }
}

const FILE_RECORD_COLUMNS: &str = r#"
    id, file_path, file_name, file_type, file_size, file_modified, last_scanned, top_folder,
    detailed_scan_attempted, detailed_scanned_at, container_format, duration_secs, probe_score,
    video_codec, video_width, video_height, frame_rate, video_bitrate, bit_depth,
    color_primaries, color_transfer,
    audio_codec, audio_channels, audio_sample_rate, audio_bitrate, audio_languages,
    subtitle_count, subtitle_languages
"#;

fn languages_from_json(json: Option<String>) -> Vec<String> {
    json.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn row_to_file_record(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_type: row.get(3)?,
        file_size: row.get::<_, i64>(4)?.max(0) as u64,
        file_modified: row.get(5)?,
        last_scanned: row.get(6)?,
        top_folder: row.get(7)?,
        detailed_scan_attempted: row.get(8)?,
        detailed_scanned_at: row.get(9)?,
        container_format: row.get(10)?,
        duration_secs: row.get(11)?,
        probe_score: row.get(12)?,
        video_codec: row.get(13)?,
        video_width: row.get(14)?,
        video_height: row.get(15)?,
        frame_rate: row.get(16)?,
        video_bitrate: row.get(17)?,
        bit_depth: row.get(18)?,
        color_primaries: row.get(19)?,
        color_transfer: row.get(20)?,
        audio_codec: row.get(21)?,
        audio_channels: row.get(22)?,
        audio_sample_rate: row.get(23)?,
        audio_bitrate: row.get(24)?,
        audio_languages: languages_from_json(row.get(25)?),
        subtitle_count: row.get(26)?,
        subtitle_languages: languages_from_json(row.get(27)?),
    })
}

impl Database {
    /// Insert a record or refresh the core fields of an existing one.
    ///
    /// Detailed probe columns are never touched here, so a file that was
    /// already probed keeps `detailed_scan_attempted`.
    pub fn upsert_file_record(&self, record: &NewFileRecord) -> StoreResult<()> {
        let now = now_timestamp();
        self.with_conn("upsert_file_record", |conn| {
            conn.execute(
                r#"
                INSERT INTO file_records (
                    file_path, file_name, file_type, file_size, file_modified, top_folder, last_scanned
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(file_path) DO UPDATE SET
                    file_name = excluded.file_name,
                    file_type = excluded.file_type,
                    file_size = excluded.file_size,
                    file_modified = excluded.file_modified,
                    top_folder = excluded.top_folder,
                    last_scanned = excluded.last_scanned
                "#,
                params![
                    record.file_path,
                    record.file_name,
                    record.file_type,
                    record.file_size as i64,
                    record.file_modified,
                    record.top_folder,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Returns true if a row was removed.
    pub fn delete_file_record(&self, file_path: &str) -> StoreResult<bool> {
        self.with_conn("delete_file_record", |conn| {
            let removed = conn.execute("DELETE FROM file_records WHERE file_path = ?", [file_path])?;
            Ok(removed > 0)
        })
    }

    pub fn get_file_record(&self, file_path: &str) -> StoreResult<Option<FileRecord>> {
        let sql = format!("SELECT {} FROM file_records WHERE file_path = ?", FILE_RECORD_COLUMNS);
        self.with_conn("get_file_record", |conn| {
            Ok(conn
                .query_row(&sql, [file_path], row_to_file_record)
                .optional()?)
        })
    }

    pub fn list_file_paths(&self) -> StoreResult<Vec<String>> {
        self.with_conn("list_file_paths", |conn| {
            let mut stmt = conn.prepare("SELECT file_path FROM file_records ORDER BY file_path")?;
            let paths = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(paths)
        })
    }

    /// Paths recorded under one target; the reconciler's scope.
    pub fn list_file_paths_under(&self, top_folder: &str) -> StoreResult<Vec<String>> {
        self.with_conn("list_file_paths_under", |conn| {
            let mut stmt = conn.prepare(
                "SELECT file_path FROM file_records WHERE top_folder = ? ORDER BY file_path",
            )?;
            let paths = stmt
                .query_map([top_folder], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(paths)
        })
    }

    /// Assign `top_folder` to records that have none and whose path lies
    /// under `root_prefix`. Rows imported from the legacy tables arrive this way.
    pub fn adopt_untargeted_records(&self, top_folder: &str, root_prefix: &str) -> StoreResult<usize> {
        self.with_conn("adopt_untargeted_records", |conn| {
            Ok(conn.execute(
                r#"
                UPDATE file_records SET top_folder = ?1
                WHERE top_folder IS NULL
                  AND substr(file_path, 1, length(?2)) = ?2
                "#,
                params![top_folder, root_prefix],
            )?)
        })
    }

    /// Size and mtime of every record under one target, for change detection.
    pub fn file_signatures_under(
        &self,
        top_folder: &str,
    ) -> StoreResult<HashMap<String, FileSignature>> {
        self.with_conn("file_signatures_under", |conn| {
            let mut stmt = conn.prepare(
                "SELECT file_path, file_size, file_modified FROM file_records WHERE top_folder = ?",
            )?;
            let rows = stmt.query_map([top_folder], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    FileSignature {
                        file_size: row.get::<_, i64>(1)?.max(0) as u64,
                        file_modified: row.get(2)?,
                    },
                ))
            })?;
            Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
        })
    }

    pub fn count_file_records(&self, top_folder: Option<&str>) -> StoreResult<u64> {
        self.with_conn("count_file_records", |conn| {
            let count: i64 = match top_folder {
                Some(folder) => conn.query_row(
                    "SELECT COUNT(*) FROM file_records WHERE top_folder = ?",
                    [folder],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM file_records", [], |row| row.get(0))?,
            };
            Ok(count as u64)
        })
    }

    /// Video records that have never been probed, ordered by path.
    ///
    /// `video_types` are the lowercased extensions (with dot) to select.
    pub fn list_unprobed_video_paths(&self, video_types: &[String]) -> StoreResult<Vec<String>> {
        if video_types.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; video_types.len()].join(", ");
        let sql = format!(
            "SELECT file_path FROM file_records
             WHERE detailed_scan_attempted = 0 AND file_type IN ({})
             ORDER BY file_path",
            placeholders
        );

        self.with_conn("list_unprobed_video_paths", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let paths = stmt
                .query_map(params_from_iter(video_types.iter()), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(paths)
        })
    }

    /// Store probe results and mark the file attempted in one statement.
    pub fn update_detailed_metadata(&self, file_path: &str, report: &ProbeReport) -> StoreResult<bool> {
        let now = now_timestamp();
        let video = report.video.as_ref();
        let audio = report.audio.as_ref();
        let audio_languages = serde_json::to_string(
            &audio.map(|a| a.languages.clone()).unwrap_or_default(),
        )?;
        let subtitle_languages = serde_json::to_string(&report.subtitles.languages)?;

        self.with_conn("update_detailed_metadata", |conn| {
            let updated = conn.execute(
                r#"
                UPDATE file_records SET
                    detailed_scan_attempted = 1,
                    detailed_scanned_at = ?,
                    container_format = ?,
                    duration_secs = ?,
                    probe_score = ?,
                    video_codec = ?,
                    video_width = ?,
                    video_height = ?,
                    frame_rate = ?,
                    video_bitrate = ?,
                    bit_depth = ?,
                    color_primaries = ?,
                    color_transfer = ?,
                    audio_codec = ?,
                    audio_channels = ?,
                    audio_sample_rate = ?,
                    audio_bitrate = ?,
                    audio_languages = ?,
                    subtitle_count = ?,
                    subtitle_languages = ?
                WHERE file_path = ?
                "#,
                params![
                    now,
                    report.container_format,
                    report.duration_secs,
                    report.probe_score,
                    video.and_then(|v| v.codec.clone()),
                    video.and_then(|v| v.width),
                    video.and_then(|v| v.height),
                    video.and_then(|v| v.frame_rate),
                    video.and_then(|v| v.bitrate),
                    video.and_then(|v| v.bit_depth),
                    video.and_then(|v| v.color_primaries.clone()),
                    video.and_then(|v| v.color_transfer.clone()),
                    audio.and_then(|a| a.codec.clone()),
                    audio.and_then(|a| a.channels),
                    audio.and_then(|a| a.sample_rate),
                    audio.and_then(|a| a.bitrate),
                    audio_languages,
                    report.subtitles.count as i64,
                    subtitle_languages,
                    file_path,
                ],
            )?;
            Ok(updated > 0)
        })
    }

    /// Record a failed probe: the flag is set, technical fields stay empty.
    pub fn mark_detailed_attempted(&self, file_path: &str) -> StoreResult<bool> {
        let now = now_timestamp();
        self.with_conn("mark_detailed_attempted", |conn| {
            let updated = conn.execute(
                "UPDATE file_records SET detailed_scan_attempted = 1, detailed_scanned_at = ? WHERE file_path = ?",
                params![now, file_path],
            )?;
            Ok(updated > 0)
        })
    }
}
