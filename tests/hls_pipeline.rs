#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use assert_fs::TempDir;
use assert_fs::prelude::*;

use mediaprep::config::{Config, HlsConfig};
use mediaprep::hls::{HlsGenerator, hls_dir_for, is_hls_complete, playlist_path_for};
use mediaprep::media::MediaToolkitFactory;
use mediaprep::supervisor::SupervisorLimits;
use mediaprep::workflow::{BatchOptions, BatchSummary, FailureReason, OutcomeStatus, Workflow};

const FAKE_FFPROBE: &str = r#"
case "$*" in
  *-version*) echo "ffprobe version fake"; exit 0 ;;
  *codec_name*) echo "h264" ;;
  *format=duration*) echo "10.000000" ;;
esac
exit 0
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// An ffmpeg stand-in; `encode` runs with `$out` set to the playlist path
fn fake_ffmpeg(bin: &Path, encode: &str) -> String {
    write_script(
        bin,
        "ffmpeg",
        &format!(
            r#"
if [ "$1" = "-version" ]; then echo "ffmpeg version fake"; exit 0; fi
for out; do :; done
dir=$(dirname "$out")
echo run >> "{}"
{}
"#,
            bin.join("runs.log").display(),
            encode
        ),
    )
}

const ENCODE_OK: &str = r#"
echo "out_time_ms=5000000"
echo "progress=continue"
: > "$dir/segment000.ts"
printf '#EXTM3U\n#EXTINF:6.0,\nsegment000.ts\n#EXT-X-ENDLIST\n' > "$out"
echo "progress=end"
exit 0
"#;

const ENCODE_HANG: &str = r#"
echo "progress=continue"
: > "$dir/segment000.ts"
printf '#EXTM3U\n#EXTINF:6.0,\nsegment000.ts\n' > "$out"
exec sleep 30
"#;

const ENCODE_FAIL: &str = r#"
echo "Error while decoding stream #0:0: Invalid data found when processing input" >&2
exit 1
"#;

fn config(bin: &Path, ffmpeg: String) -> Config {
    let mut config = Config::default();
    config.media.ffmpeg_path = ffmpeg;
    config.media.ffprobe_path = write_script(bin, "ffprobe", FAKE_FFPROBE);
    config.supervisor.stall_timeout_secs = 1;
    config.supervisor.poll_interval_ms = 100;
    config
}

fn options(root: &Path) -> BatchOptions {
    BatchOptions {
        root: root.to_path_buf(),
        skip_patterns: vec!["animatics".to_string()],
        assume_yes: true,
        dry_run: false,
    }
}

fn runs(bin: &Path) -> usize {
    std::fs::read_to_string(bin.join("runs.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn completed_encode_is_not_repeated() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("Show/ep1.mkv").write_binary(b"mkv").unwrap();
    media.child("Show/Animatics/a1.mkv").write_binary(b"mkv").unwrap();

    let config = config(bin.path(), fake_ffmpeg(bin.path(), ENCODE_OK));
    let workflow = Workflow::new(config, options(media.path()));

    let summary = workflow.generate_hls(false, 1).await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            succeeded: 1,
            skipped: 1,
            failed: 0
        }
    );

    let source = media.path().join("Show/ep1.mkv");
    assert!(is_hls_complete(&source));
    assert!(hls_dir_for(&source).join("segment000.ts").exists());
    assert!(!hls_dir_for(&media.path().join("Show/Animatics/a1.mkv")).exists());
    assert_eq!(runs(bin.path()), 1);

    let summary = workflow.generate_hls(false, 1).await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(runs(bin.path()), 1);

    // --force ignores the finished playlist
    let summary = workflow.generate_hls(true, 1).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(runs(bin.path()), 2);
}

#[tokio::test]
async fn stalled_encode_leaves_nothing_behind() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("ep1.mkv").write_binary(b"mkv").unwrap();

    let config = config(bin.path(), fake_ffmpeg(bin.path(), ENCODE_HANG));
    let workflow = Workflow::new(config, options(media.path()));

    let summary = workflow.generate_hls(false, 1).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_status(), 1);

    let source = media.path().join("ep1.mkv");
    assert!(!hls_dir_for(&source).exists());
    assert!(!is_hls_complete(&source));
}

#[tokio::test]
async fn timed_out_encode_is_classified_and_cleaned() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("movie.mkv").write_binary(b"mkv").unwrap();

    let config = config(bin.path(), fake_ffmpeg(bin.path(), ENCODE_HANG));
    let generator = HlsGenerator::new(
        MediaToolkitFactory::create(config.media.clone()),
        HlsConfig::default(),
        SupervisorLimits {
            absolute: Some(Duration::from_secs(1)),
            stall: None,
            poll_interval: Duration::from_millis(100),
        },
    );

    let source = media.path().join("movie.mkv");
    let outcome = generator.generate(&source, false, 1, 1).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed(FailureReason::Timeout));
    assert!(outcome.message.starts_with("Timeout after 0:0"), "{}", outcome.message);
    assert!(!playlist_path_for(&source).exists());
    assert!(!hls_dir_for(&source).exists());
}

#[tokio::test]
async fn encoder_error_reports_stderr_tail() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("broken.mkv").write_binary(b"mkv").unwrap();

    let config = config(bin.path(), fake_ffmpeg(bin.path(), ENCODE_FAIL));
    let generator = HlsGenerator::new(
        MediaToolkitFactory::create(config.media.clone()),
        config.hls.clone(),
        SupervisorLimits::from_config(&config.supervisor),
    );

    let source = media.path().join("broken.mkv");
    let outcome = generator.generate(&source, false, 1, 1).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed(FailureReason::Tool));
    assert!(outcome.message.starts_with("ffmpeg error: "));
    assert!(outcome.message.ends_with("Invalid data found when processing input"));
    assert!(!hls_dir_for(&source).exists());
}

#[tokio::test]
async fn finished_playlist_survives_future_source_mtime() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("skewed.mkv").write_binary(b"mkv").unwrap();

    let source = media.path().join("skewed.mkv");
    std::fs::File::options()
        .write(true)
        .open(&source)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let config = config(bin.path(), fake_ffmpeg(bin.path(), ENCODE_OK));
    let generator = HlsGenerator::new(
        MediaToolkitFactory::create(config.media.clone()),
        config.hls.clone(),
        SupervisorLimits::from_config(&config.supervisor),
    );
    let outcome = generator.generate(&source, false, 1, 1).await;

    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert!(outcome.message.starts_with("Generated (remuxed)"), "{}", outcome.message);
    assert!(playlist_path_for(&source).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_batch_reports_every_file() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    for name in ["a.mkv", "b.mkv", "c.mkv", "d.mkv", "e.mkv"] {
        media.child(name).write_binary(b"mkv").unwrap();
    }

    let config = config(bin.path(), fake_ffmpeg(bin.path(), ENCODE_OK));
    let workflow = Workflow::new(config, options(media.path()));

    let summary = workflow.generate_hls(false, 3).await.unwrap();
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);
    for name in ["a.mkv", "b.mkv", "c.mkv", "d.mkv", "e.mkv"] {
        assert!(is_hls_complete(&media.path().join(name)), "{}", name);
    }
}
