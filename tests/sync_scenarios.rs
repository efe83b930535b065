use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;

use plexcrawl::config::StoreConfig;
use plexcrawl::db::{Database, JobFilter, JobStatus, NewFileRecord};
use plexcrawl::scanner::Crawler;
use plexcrawl::schedule::{JobOutcome, PassReport, Scheduler, UNREACHABLE_MESSAGE};
use plexcrawl::volume::{Remount, VolumeRecovery};

/// Mounts a share by creating `<base>/<share>`, unless the share is listed as down.
struct FakeNas {
    base: PathBuf,
    down: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl Remount for FakeNas {
    fn reconnect(&self, _server: &str, share: &str) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.iter().any(|s| s == share) {
            anyhow::bail!("share {share} is offline");
        }
        fs::create_dir_all(self.base.join(share))?;
        Ok(())
    }
}

struct Fixture {
    db_dir: TempDir,
    media: TempDir,
    db: Database,
}

impl Fixture {
    fn new() -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            lock_retry_delay_ms: 10,
            ..StoreConfig::default()
        };
        let db = Database::open(&db_dir.path().join("index.db"), &config).unwrap();
        db.initialize().unwrap();

        Self {
            db_dir,
            media: tempfile::tempdir().unwrap(),
            db,
        }
    }

    fn base(&self) -> &Path {
        self.media.path()
    }

    fn root(&self, target: &str) -> PathBuf {
        self.base().join(target)
    }

    fn pass_with(&self, down: &[&str]) -> (PassReport, usize) {
        let calls = Arc::new(AtomicUsize::new(0));
        let nas = FakeNas {
            base: self.base().to_path_buf(),
            down: down.iter().map(|s| s.to_string()).collect(),
            calls: calls.clone(),
        };
        let scheduler = Scheduler::new(
            &self.db,
            Crawler::new(self.base()),
            VolumeRecovery::new(Box::new(nas), Duration::from_millis(5)),
        )
        .with_server(Some("nas.local".to_string()));

        let report = scheduler.run_pass().unwrap();
        let calls = calls.load(Ordering::SeqCst);
        (report, calls)
    }

    fn pass(&self) -> PassReport {
        self.pass_with(&[]).0
    }

    fn paths_under(&self, target: &str) -> Vec<String> {
        self.db.list_file_paths_under(target).unwrap()
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[test]
fn empty_target_produces_no_records() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.root("Movies")).unwrap();
    fx.db.add_scan_target("Movies").unwrap();

    let report = fx.pass();

    assert_eq!(report.completed(), 1);
    assert!(fx.paths_under("Movies").is_empty());
    let target = fx.db.get_scan_target("Movies").unwrap().unwrap();
    assert!(target.last_scanned.is_some());
}

#[test]
fn new_file_is_indexed_once_and_then_skipped() {
    let fx = Fixture::new();
    let root = fx.root("Movies");
    fs::create_dir_all(&root).unwrap();
    let file = root.join("A.mkv");
    fs::write(&file, vec![0u8; 10_485_760]).unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    fx.db.add_scan_target("Movies").unwrap();

    let first = fx.pass();
    assert_eq!(first.files_written(), 1);

    let record = fx.db.get_file_record(&path_string(&file)).unwrap().unwrap();
    assert_eq!(record.file_name, "A.mkv");
    assert_eq!(record.file_type, ".mkv");
    assert_eq!(record.file_size, 10_485_760);
    assert_eq!(record.file_modified, "2023-11-14T22:13:20");
    assert_eq!(record.top_folder.as_deref(), Some("Movies"));

    let second = fx.pass();
    assert_eq!(second.completed(), 1);
    assert_eq!(second.files_written(), 0);
    let unchanged = fx.db.get_file_record(&path_string(&file)).unwrap().unwrap();
    assert_eq!(unchanged.last_scanned, record.last_scanned);
}

#[test]
fn deleted_file_record_is_removed() {
    let fx = Fixture::new();
    let root = fx.root("Movies");
    fs::create_dir_all(&root).unwrap();
    let file = root.join("A.mkv");
    fs::write(&file, b"movie").unwrap();
    fx.db.add_scan_target("Movies").unwrap();

    fx.pass();
    assert_eq!(fx.paths_under("Movies").len(), 1);

    fs::remove_file(&file).unwrap();
    let report = fx.pass();

    assert_eq!(report.files_removed(), 1);
    assert!(fx.db.get_file_record(&path_string(&file)).unwrap().is_none());
}

#[test]
fn stored_paths_match_disk_after_pass() {
    let fx = Fixture::new();
    let root = fx.root("TV");
    fs::create_dir_all(root.join("Show/Season 1")).unwrap();
    let files = [
        root.join("Show/Season 1/e01.mkv"),
        root.join("Show/Season 1/e02.mkv"),
        root.join("Show/poster.jpg"),
    ];
    for file in &files {
        fs::write(file, b"x").unwrap();
    }
    fx.db.add_scan_target("TV").unwrap();

    // A record from an earlier pass for a file that is already gone.
    fx.db
        .upsert_file_record(&NewFileRecord {
            file_path: path_string(&root.join("Show/old.mkv")),
            file_name: "old.mkv".to_string(),
            file_type: ".mkv".to_string(),
            file_size: 1,
            file_modified: "2020-01-01T00:00:00".to_string(),
            top_folder: Some("TV".to_string()),
        })
        .unwrap();

    fx.pass();

    let mut expected: Vec<String> = files.iter().map(|f| path_string(f)).collect();
    expected.sort();
    assert_eq!(fx.paths_under("TV"), expected);
}

#[test]
fn writes_succeed_after_lock_is_released() {
    let fx = Fixture::new();
    let db_path = fx.db_dir.path().join("locked.db");
    let config = StoreConfig {
        busy_timeout_ms: 50,
        ..StoreConfig::default()
    };
    let db = Database::open(&db_path, &config).unwrap();
    db.initialize().unwrap();

    let blocker = rusqlite::Connection::open(&db_path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();
    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(1200));
        blocker.execute_batch("COMMIT").unwrap();
    });

    let started = Instant::now();
    db.upsert_file_record(&NewFileRecord {
        file_path: "/m/Movies/A.mkv".to_string(),
        file_name: "A.mkv".to_string(),
        file_type: ".mkv".to_string(),
        file_size: 1,
        file_modified: "2024-01-01T00:00:00".to_string(),
        top_folder: Some("Movies".to_string()),
    })
    .unwrap();
    release.join().unwrap();

    // At least one 500 ms retry delay, and well inside five attempts.
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(db.get_file_record("/m/Movies/A.mkv").unwrap().is_some());
}

#[test]
fn missing_mount_is_recovered_by_reconnect() {
    let fx = Fixture::new();
    fx.db.add_scan_target("Movies").unwrap();

    let (report, calls) = fx.pass_with(&[]);

    assert_eq!(calls, 1);
    assert!(matches!(
        report.jobs[0].outcome,
        JobOutcome::Completed { recovered: true, .. }
    ));
}

#[test]
fn unreachable_target_is_skipped_without_deletions() {
    let fx = Fixture::new();
    let movies = fx.root("Movies");
    fs::create_dir_all(&movies).unwrap();
    fs::write(movies.join("A.mkv"), b"a").unwrap();
    fx.db.add_scan_target("Movies").unwrap();
    fx.db.add_scan_target("Offline").unwrap();

    // Records from when the Offline share was still mounted.
    fx.db
        .upsert_file_record(&NewFileRecord {
            file_path: path_string(&fx.root("Offline").join("B.mkv")),
            file_name: "B.mkv".to_string(),
            file_type: ".mkv".to_string(),
            file_size: 1,
            file_modified: "2024-01-01T00:00:00".to_string(),
            top_folder: Some("Offline".to_string()),
        })
        .unwrap();

    let (report, calls) = fx.pass_with(&["Offline"]);

    assert_eq!(calls, 1);
    assert_eq!(report.completed(), 1);
    assert_eq!(report.unreachable(), 1);
    assert_eq!(fx.paths_under("Offline").len(), 1);
    assert_eq!(fx.paths_under("Movies").len(), 1);

    // Every job created by the pass is terminal.
    assert!(fx.db.list_jobs(JobFilter::Open, 10).unwrap().is_empty());
    let failed = fx
        .db
        .list_jobs(JobFilter::Status(JobStatus::Failed), 10)
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].top_folder, "Offline");
    assert_eq!(failed[0].error_message.as_deref(), Some(UNREACHABLE_MESSAGE));

    // The target stays registered and is retried next pass with a new job.
    assert!(fx.db.get_scan_target("Offline").unwrap().unwrap().is_active());
    let (next, _) = fx.pass_with(&[]);
    assert_eq!(next.completed(), 2);
}
