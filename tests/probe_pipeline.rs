use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use plexcrawl::config::{ProbeConfig, StoreConfig};
use plexcrawl::db::Database;
use plexcrawl::probe::{
    AudioStream, ProbeError, ProbePipeline, ProbeReport, SubtitleSummary, TechnicalProbe,
    VideoStream,
};
use plexcrawl::scanner::Crawler;

/// Returns malformed output for `.avi` files and a 4K HEVC report otherwise.
struct ScriptedProbe {
    calls: Arc<AtomicUsize>,
}

impl TechnicalProbe for ScriptedProbe {
    fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.extension().and_then(|e| e.to_str()) == Some("avi") {
            return Err(ProbeError::Malformed("unexpected end of input".to_string()));
        }
        Ok(ProbeReport {
            container_format: Some("matroska,webm".to_string()),
            duration_secs: Some(5400.5),
            probe_score: Some(100),
            video: Some(VideoStream {
                codec: Some("hevc".to_string()),
                width: Some(3840),
                height: Some(2160),
                frame_rate: Some(23.976),
                bit_depth: Some(10),
                ..Default::default()
            }),
            audio: Some(AudioStream {
                codec: Some("eac3".to_string()),
                channels: Some(6),
                languages: vec!["eng".to_string(), "fre".to_string()],
                ..Default::default()
            }),
            subtitles: SubtitleSummary {
                count: 2,
                languages: vec!["eng".to_string()],
            },
        })
    }
}

fn indexed_library(files: &[&str]) -> (TempDir, TempDir, Database) {
    let db_dir = tempfile::tempdir().unwrap();
    let db = Database::open(&db_dir.path().join("index.db"), &StoreConfig::default()).unwrap();
    db.initialize().unwrap();

    let media = tempfile::tempdir().unwrap();
    let root = media.path().join("Movies");
    fs::create_dir_all(&root).unwrap();
    for name in files {
        fs::write(root.join(name), b"not really a video").unwrap();
    }
    db.add_scan_target("Movies").unwrap();
    Crawler::new(media.path()).crawl(&db, "Movies").unwrap();

    (db_dir, media, db)
}

fn path_of(media: &TempDir, name: &str) -> String {
    media
        .path()
        .join("Movies")
        .join(name)
        .to_string_lossy()
        .to_string()
}

#[test]
fn malformed_output_marks_file_attempted_and_is_not_retried() {
    let (_db_dir, media, db) = indexed_library(&["broken.avi"]);
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = ProbePipeline::new(
        ScriptedProbe {
            calls: calls.clone(),
        },
        &ProbeConfig::default(),
    );

    let first = pipeline.run(&db).unwrap();
    assert_eq!(first.selected, 1);
    assert_eq!(first.failed, 1);

    let record = db.get_file_record(&path_of(&media, "broken.avi")).unwrap().unwrap();
    assert!(record.detailed_scan_attempted);
    assert!(record.video_codec.is_none());
    assert!(record.container_format.is_none());
    assert!(!record.has_technical_metadata());

    let second = pipeline.run(&db).unwrap();
    assert_eq!(second.selected, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn successful_probe_fills_technical_fields() {
    let (_db_dir, media, db) = indexed_library(&["Film.mkv", "._Film.mkv", "Film.srt"]);
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = ProbePipeline::new(
        ScriptedProbe {
            calls: calls.clone(),
        },
        &ProbeConfig::default(),
    );

    let stats = pipeline.run(&db).unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.sidecars, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let record = db.get_file_record(&path_of(&media, "Film.mkv")).unwrap().unwrap();
    assert!(record.detailed_scan_attempted);
    assert!(record.detailed_scanned_at.is_some());
    assert_eq!(record.video_codec.as_deref(), Some("hevc"));
    assert_eq!(record.video_width, Some(3840));
    assert_eq!(record.video_height, Some(2160));
    assert_eq!(record.audio_channels, Some(6));
    assert_eq!(record.audio_languages, vec!["eng", "fre"]);
    assert_eq!(record.subtitle_count, Some(2));

    // Sidecars and non-video files are left alone.
    let sidecar = db.get_file_record(&path_of(&media, "._Film.mkv")).unwrap().unwrap();
    assert!(!sidecar.detailed_scan_attempted);
    let subs = db.get_file_record(&path_of(&media, "Film.srt")).unwrap().unwrap();
    assert!(!subs.detailed_scan_attempted);
}

#[test]
fn recrawl_keeps_probe_results() {
    let (_db_dir, media, db) = indexed_library(&["Film.mkv"]);
    let pipeline = ProbePipeline::new(
        ScriptedProbe {
            calls: Arc::new(AtomicUsize::new(0)),
        },
        &ProbeConfig::default(),
    );
    pipeline.run(&db).unwrap();

    let file = media.path().join("Movies/Film.mkv");
    fs::write(&file, b"a different and longer payload").unwrap();
    let stats = Crawler::new(media.path()).crawl(&db, "Movies").unwrap();
    assert_eq!(stats.updated, 1);

    let record = db.get_file_record(&path_of(&media, "Film.mkv")).unwrap().unwrap();
    assert_eq!(record.file_size, 30);
    assert_eq!(record.video_codec.as_deref(), Some("hevc"));
    assert!(record.detailed_scan_attempted);
}
