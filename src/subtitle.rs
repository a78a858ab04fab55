use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::completion::is_complete;
use crate::error::{MediaPrepError, Result};
use crate::transcribe::{Transcriber, Transcription};
use crate::workflow::{FailureReason, ItemOutcome};

/// Every valid WebVTT file starts with this
const VTT_MARKER: &str = "WEBVTT";

/// First line of every WebVTT file, followed by a blank line
pub const VTT_HEADER: &str = "WEBVTT\n\n";

/// `<stem>.vtt` next to the given media or subtitle file
pub fn vtt_path_for(path: &Path) -> PathBuf {
    path.with_extension("vtt")
}

/// Convert SRT text to WebVTT.
///
/// Blocks are separated by blank lines. A block needs at least two lines and
/// a `-->` timing line; anything else is dropped. The first timing line of a
/// block has its millisecond commas turned into periods and every line after
/// it is kept as cue text. Sequence numbers are not carried over.
pub fn srt_to_vtt(srt: &str) -> String {
    let mut vtt = String::from(VTT_HEADER);

    for block in split_blocks(srt) {
        if block.len() < 2 {
            continue;
        }

        let Some(timing_idx) = block.iter().position(|line| line.contains("-->")) else {
            continue;
        };

        vtt.push_str(&block[timing_idx].replace(',', "."));
        vtt.push('\n');
        vtt.push_str(&block[timing_idx + 1..].join("\n"));
        vtt.push_str("\n\n");
    }

    vtt
}

/// Lines grouped into blocks; whitespace-only lines separate blocks
fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    for block in &mut blocks {
        // Mirrors stripping the block as a whole: only its outer edges lose whitespace
        if let Some(first) = block.first_mut() {
            let line: &str = *first;
            *first = line.trim_start();
        }
        if let Some(last) = block.last_mut() {
            let line: &str = *last;
            *last = line.trim_end();
        }
    }

    blocks
}

/// Render transcription segments as a WebVTT document
pub fn transcription_to_vtt(transcription: &Transcription) -> String {
    let mut vtt = String::from(VTT_HEADER);

    for segment in &transcription.segments {
        vtt.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_vtt_time(segment.start),
            format_vtt_time(segment.end),
            segment.text.trim()
        ));
    }

    vtt
}

/// Format time in seconds to WebVTT time format (HH:MM:SS.mmm)
pub fn format_vtt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0) as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// Fail unless `path` is an existing file with an `.srt` extension
pub fn check_srt_path(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(MediaPrepError::FileNotFound(path.display().to_string()));
    }

    let is_srt = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("srt"));
    if !is_srt {
        return Err(MediaPrepError::UnsupportedFormat(format!(
            "Not an SRT file: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Read an SRT file and write its WebVTT sibling, returning the new path
pub async fn convert_srt_file(srt_path: &Path) -> Result<PathBuf> {
    check_srt_path(srt_path)?;

    let bytes = fs::read(srt_path).await?;
    let srt = String::from_utf8(bytes).map_err(|e| {
        MediaPrepError::UnsupportedFormat(format!(
            "{} is not valid UTF-8: {}",
            srt_path.display(),
            e
        ))
    })?;
    // Editors on Windows like to prepend a byte order mark
    let srt = srt.strip_prefix('\u{feff}').unwrap_or(&srt);

    let vtt_path = vtt_path_for(srt_path);
    fs::write(&vtt_path, srt_to_vtt(srt)).await?;

    info!("Saved: {}", vtt_path.display());
    Ok(vtt_path)
}

/// Write a transcription as WebVTT
pub async fn write_vtt(transcription: &Transcription, output_path: &Path) -> Result<()> {
    info!("Generating VTT file: {}", output_path.display());
    fs::write(output_path, transcription_to_vtt(transcription)).await?;
    Ok(())
}

/// Whether `source` already has an up-to-date WebVTT sibling
pub fn has_fresh_vtt(source: &Path) -> bool {
    is_complete(source, &vtt_path_for(source), Some(VTT_MARKER))
}

/// Convert one SRT file unless a fresh WebVTT sibling exists
pub async fn convert_one(srt_path: &Path, force: bool) -> ItemOutcome {
    if !force && has_fresh_vtt(srt_path) {
        return ItemOutcome::skipped("VTT already exists (skipped)".to_string());
    }

    match convert_srt_file(srt_path).await {
        Ok(vtt_path) => ItemOutcome::succeeded(format!("Saved: {}", file_name(&vtt_path))),
        Err(e) => ItemOutcome::failed(FailureReason::Internal, format!("Error: {}", e)),
    }
}

/// Transcribe one video and write its WebVTT sibling
pub async fn generate_for_video(transcriber: &dyn Transcriber, video: &Path, force: bool) -> ItemOutcome {
    let vtt_path = vtt_path_for(video);
    if !force && has_fresh_vtt(video) {
        return ItemOutcome::skipped("Subtitles already exist (skipped)".to_string());
    }

    info!("Transcribing {} with model {}", video.display(), transcriber.model());
    let transcription = match transcriber.transcribe(video).await {
        Ok(transcription) => transcription,
        Err(e) => return ItemOutcome::failed(FailureReason::Tool, format!("Error: {}", e)),
    };

    if transcription.segments.is_empty() {
        warn!("No speech detected in {}", video.display());
    }

    match write_vtt(&transcription, &vtt_path).await {
        Ok(()) => ItemOutcome::succeeded(format!(
            "Saved: {} ({} cues{})",
            file_name(&vtt_path),
            transcription.segments.len(),
            transcription
                .language
                .as_deref()
                .map(|l| format!(", language {}", l))
                .unwrap_or_default()
        )),
        Err(e) => {
            // A half-written file would look complete to the next run
            let _ = fs::remove_file(&vtt_path).await;
            ItemOutcome::failed(FailureReason::Internal, format!("Error: {}", e))
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
