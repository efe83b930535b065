use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Total attempts for an operation that hits a locked database.
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    /// Fixed delay between lock retries.
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,

    /// SQLite busy handler timeout applied to every pooled connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_lock_retry_attempts() -> u32 {
    5
}

fn default_lock_retry_delay_ms() -> u64 {
    500
}

fn default_busy_timeout_ms() -> u64 {
    1000
}

fn default_pool_size() -> u32 {
    4
}

impl StoreConfig {
    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Directory under which every scan target is mounted.
    /// The `base_scan_path` setting in the database takes precedence.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Crawl targets on the rayon pool instead of one after another.
    #[serde(default)]
    pub parallel_targets: bool,
}

fn default_base_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Volumes")
    } else {
        PathBuf::from("/mnt")
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            parallel_targets: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Fallback SMB server when the `smb_server` setting is not set.
    #[serde(default)]
    pub server: Option<String>,

    /// How long to wait after a reconnect before checking the mount again.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Upper bound on the reconnect command itself.
    #[serde(default = "default_reconnect_timeout_secs")]
    pub reconnect_timeout_secs: u64,

    /// Reconnect command; `{server}` and `{share}` are substituted.
    #[serde(default = "default_reconnect_command")]
    pub reconnect_command: Vec<String>,
}

fn default_settle_secs() -> u64 {
    5
}

fn default_reconnect_timeout_secs() -> u64 {
    30
}

fn default_reconnect_command() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["open".to_string(), "smb://{server}/{share}".to_string()]
    } else {
        vec![
            "gio".to_string(),
            "mount".to_string(),
            "smb://{server}/{share}".to_string(),
        ]
    }
}

impl RecoveryConfig {
    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            server: None,
            settle_secs: default_settle_secs(),
            reconnect_timeout_secs: default_reconnect_timeout_secs(),
            reconnect_command: default_reconnect_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of files probed in one pipeline run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Emit a progress event every N files.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Lowercased extensions, with the leading dot, treated as video containers.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Glob patterns for platform metadata files that are never probed.
    #[serde(default = "default_sidecar_patterns")]
    pub sidecar_patterns: Vec<String>,
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    500
}

fn default_progress_every() -> usize {
    10
}

fn default_video_extensions() -> Vec<String> {
    [
        ".mkv", ".mp4", ".m4v", ".avi", ".mov", ".wmv", ".ts", ".m2ts", ".webm", ".mpg",
        ".mpeg", ".flv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sidecar_patterns() -> Vec<String> {
    ["._*", ".DS_Store", "Thumbs.db", "desktop.ini"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            timeout_secs: default_probe_timeout_secs(),
            batch_size: default_batch_size(),
            progress_every: default_progress_every(),
            video_extensions: default_video_extensions(),
            sidecar_patterns: default_sidecar_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scheduled crawl passes.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds between probe pipeline runs.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Jobs left in progress longer than this are considered abandoned.
    #[serde(default = "default_stale_job_secs")]
    pub stale_job_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    3600
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_stale_job_secs() -> u64 {
    6 * 3600
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            stale_job_secs: default_stale_job_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    Config::data_dir().join("plexcrawl.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            store: StoreConfig::default(),
            scanner: ScannerConfig::default(),
            recovery: RecoveryConfig::default(),
            probe: ProbeConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default file if none exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// `PLEXCRAWL_CONFIG` if set, otherwise `$XDG_CONFIG_HOME/plexcrawl/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PLEXCRAWL_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plexcrawl")
            .join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plexcrawl")
    }

    pub fn log_dir() -> PathBuf {
        Self::data_dir().join("logs")
    }
}
