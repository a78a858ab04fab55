//! Decides whether a previous run already produced a valid output.
//!
//! An output counts only when it exists, carries its completion marker (for
//! formats that have one) and is at least as new as its source.

use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// Whether `output` is a complete, up-to-date product of `source`.
///
/// Any I/O error while checking counts as "not complete".
pub fn is_complete(source: &Path, output: &Path, marker: Option<&str>) -> bool {
    match check(source, output, marker) {
        Ok(complete) => complete,
        Err(e) => {
            debug!("Completion check for {} failed: {}", output.display(), e);
            false
        }
    }
}

/// Whether `output` is a file containing `marker`, regardless of timestamps
pub fn has_marker(output: &Path, marker: &str) -> bool {
    match std::fs::read(output) {
        Ok(content) => contains(&content, marker.as_bytes()),
        Err(_) => false,
    }
}

fn check(source: &Path, output: &Path, marker: Option<&str>) -> std::io::Result<bool> {
    let output_meta = match std::fs::metadata(output) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if let Some(marker) = marker {
        let content = std::fs::read(output)?;
        if !contains(&content, marker.as_bytes()) {
            return Ok(false);
        }
    }

    let source_modified = std::fs::metadata(source)?.modified()?;
    Ok(!is_newer(source_modified, output_meta.modified()?))
}

fn is_newer(candidate: SystemTime, reference: SystemTime) -> bool {
    candidate > reference
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn missing_output_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        std::fs::write(&source, b"video").unwrap();

        assert!(!is_complete(&source, &dir.path().join("a.vtt"), None));
    }

    #[test]
    fn fresh_output_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.srt");
        let output = dir.path().join("a.vtt");
        std::fs::write(&source, b"srt").unwrap();
        std::fs::write(&output, b"WEBVTT").unwrap();

        let now = SystemTime::now();
        set_mtime(&source, now - Duration::from_secs(60));
        set_mtime(&output, now);

        assert!(is_complete(&source, &output, None));
    }

    #[test]
    fn equal_mtimes_count_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.srt");
        let output = dir.path().join("a.vtt");
        std::fs::write(&source, b"srt").unwrap();
        std::fs::write(&output, b"WEBVTT").unwrap();

        let now = SystemTime::now();
        set_mtime(&source, now);
        set_mtime(&output, now);

        assert!(is_complete(&source, &output, None));
    }

    #[test]
    fn touched_source_invalidates_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        let output = dir.path().join("playlist.m3u8");
        std::fs::write(&source, b"video").unwrap();
        std::fs::write(&output, b"#EXTM3U\n#EXT-X-ENDLIST\n").unwrap();

        let now = SystemTime::now();
        set_mtime(&output, now - Duration::from_secs(60));
        set_mtime(&source, now);

        assert!(!is_complete(&source, &output, Some("#EXT-X-ENDLIST")));
    }

    #[test]
    fn marker_is_required_when_given() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        let output = dir.path().join("playlist.m3u8");
        std::fs::write(&source, b"video").unwrap();
        std::fs::write(&output, b"#EXTM3U\n#EXTINF:6.0,\nsegment000.ts\n").unwrap();
        set_mtime(&source, SystemTime::now() - Duration::from_secs(60));

        assert!(!is_complete(&source, &output, Some("#EXT-X-ENDLIST")));
        assert!(is_complete(&source, &output, None));
    }

    #[test]
    fn marker_check_ignores_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("playlist.m3u8");
        assert!(!has_marker(&output, "#EXT-X-ENDLIST"));

        std::fs::write(&output, b"#EXTM3U\n#EXTINF:6.0,\nsegment000.ts\n").unwrap();
        assert!(!has_marker(&output, "#EXT-X-ENDLIST"));

        std::fs::write(&output, b"#EXTM3U\n#EXT-X-ENDLIST\n").unwrap();
        assert!(has_marker(&output, "#EXT-X-ENDLIST"));
    }

    #[test]
    fn directory_in_place_of_output_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        std::fs::write(&source, b"video").unwrap();
        let output = dir.path().join("a.jpg");
        std::fs::create_dir(&output).unwrap();

        assert!(!is_complete(&source, &output, None));
    }
}
