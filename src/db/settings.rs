use rusqlite::{params, OptionalExtension};

use super::{Database, StoreResult};

/// SMB server used when remounting a missing target.
pub const SETTING_SMB_SERVER: &str = "smb_server";

/// Directory under which targets are mounted; overrides the config file.
pub const SETTING_BASE_SCAN_PATH: &str = "base_scan_path";

impl Database {
    pub fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn("get_setting", |conn| {
            Ok(conn
                .query_row("SELECT value FROM app_settings WHERE key = ?", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn("set_setting", |conn| {
            conn.execute(
                "INSERT INTO app_settings (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }
}
