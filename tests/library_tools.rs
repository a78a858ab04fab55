#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_fs::TempDir;
use assert_fs::prelude::*;

use mediaprep::config::Config;
use mediaprep::error::MediaPrepError;
use mediaprep::workflow::{BatchOptions, BatchSummary, Workflow};

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Reports the moov atom last for files named `late*.mp4`
const FAKE_FFPROBE: &str = r#"
case "$*" in
  *-version*) echo "ffprobe version fake"; exit 0 ;;
  *format=duration*) echo "120.0" ;;
  *trace*late*)
    echo "[mov @ 0x1] type:'ftyp' parent:'root' sz: 32 8 300" >&2
    echo "[mov @ 0x1] type:'mdat' parent:'root' sz: 200 40 300" >&2
    echo "[mov @ 0x1] type:'moov' parent:'root' sz: 60 240 300" >&2 ;;
  *trace*.mp4)
    echo "[mov @ 0x1] type:'moov' parent:'root' sz: 60 40 300" >&2
    echo "[mov @ 0x1] type:'mdat' parent:'root' sz: 200 100 300" >&2 ;;
esac
exit 0
"#;

/// Writes a fixed payload to the last argument, failing for inputs named `bad*`
const FAKE_FFMPEG: &str = r#"
if [ "$1" = "-version" ]; then echo "ffmpeg version fake"; exit 0; fi
for out; do :; done
printf 'partial' > "$out"
case "$*" in
  *bad*) echo "moov atom not found" >&2; exit 1 ;;
esac
printf 'rewritten' > "$out"
exit 0
"#;

fn workflow(bin: &Path, root: &Path) -> Workflow {
    let mut config = Config::default();
    config.media.ffmpeg_path = write_script(bin, "ffmpeg", FAKE_FFMPEG);
    config.media.ffprobe_path = write_script(bin, "ffprobe", FAKE_FFPROBE);

    Workflow::new(
        config,
        BatchOptions {
            root: root.to_path_buf(),
            skip_patterns: Vec::new(),
            assume_yes: true,
            dry_run: false,
        },
    )
}

#[tokio::test]
async fn faststart_rewrites_only_late_moov_files() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("early.mp4").write_str("original").unwrap();
    media.child("late.mp4").write_str("original").unwrap();
    media.child("late_bad.mp4").write_str("original").unwrap();
    media.child("clip.mkv").write_str("original").unwrap();

    let summary = workflow(bin.path(), media.path()).fix_faststart().await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            succeeded: 1,
            skipped: 1,
            failed: 1
        }
    );

    media.child("early.mp4").assert("original");
    media.child("late.mp4").assert("rewritten");
    media.child("late_bad.mp4").assert("original");
    assert!(!media.path().join("late.tmp.mp4").exists());
    assert!(!media.path().join("late_bad.tmp.mp4").exists());
}

#[tokio::test]
async fn thumbnails_are_written_once_and_failures_cleaned() {
    let bin = TempDir::new().unwrap();
    let media = TempDir::new().unwrap();
    media.child("movie.mkv").write_str("video").unwrap();
    media.child("bad.mp4").write_str("video").unwrap();

    let workflow = workflow(bin.path(), media.path());

    let summary = workflow.generate_thumbnails(false).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    media.child("movie.jpg").assert("rewritten");
    assert!(!media.path().join("bad.jpg").exists());

    let summary = workflow.generate_thumbnails(false).await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn missing_toolkit_is_fatal_before_scanning() {
    let media = TempDir::new().unwrap();
    media.child("late.mp4").write_str("original").unwrap();

    let mut config = Config::default();
    config.media.ffmpeg_path = "/nonexistent/ffmpeg".to_string();
    let workflow = Workflow::new(
        config,
        BatchOptions {
            root: media.path().join("does-not-exist"),
            skip_patterns: Vec::new(),
            assume_yes: true,
            dry_run: false,
        },
    );

    assert!(matches!(
        workflow.fix_faststart().await,
        Err(MediaPrepError::MissingDependency { .. })
    ));
    media.child("late.mp4").assert("original");
}
