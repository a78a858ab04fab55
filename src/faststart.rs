//! Moves the MP4 `moov` atom in front of the media data so browsers can
//! start playback before the whole file has downloaded.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::media::MediaToolkit;
use crate::workflow::{FailureReason, ItemOutcome};

const ERROR_EXCERPT_CHARS: usize = 200;

/// Where the root `moov` atom sits relative to `mdat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoovPosition {
    Start,
    End,
    Unknown,
}

/// Classify a `-v trace` probe log.
///
/// Root atom lines look like
/// `type:'moov' parent:'root' sz: 1057508 264137053 265194553`; the offset is
/// the second number after `sz:`. When an atom appears more than once at the
/// root, its last readable offset counts.
pub fn parse_moov_position(trace: &str) -> MoovPosition {
    let moov = root_atom_offset(trace, "moov");
    let mdat = root_atom_offset(trace, "mdat");

    match (moov, mdat) {
        (Some(moov), Some(mdat)) if moov < mdat => MoovPosition::Start,
        (Some(_), Some(_)) => MoovPosition::End,
        _ => MoovPosition::Unknown,
    }
}

fn root_atom_offset(trace: &str, atom: &str) -> Option<u64> {
    let type_tag = format!("type:'{}'", atom);

    trace
        .lines()
        .filter(|line| line.contains(&type_tag) && line.contains("parent:'root'"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let sz = parts.iter().position(|p| p.starts_with("sz:"))?;
            parts.get(sz + 2)?.parse().ok()
        })
        .last()
}

/// `<stem>.tmp.mp4` in the same directory, so the final rename stays on one filesystem
pub fn temp_path_for(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{}.tmp.mp4", stem))
}

/// Probe a file; probe failures read as `Unknown`
pub async fn moov_position(toolkit: &dyn MediaToolkit, video: &Path) -> MoovPosition {
    match toolkit.atom_trace(video).await {
        Ok(trace) => parse_moov_position(&trace),
        Err(e) => {
            warn!("Could not check moov position of {}: {}", video.display(), e);
            MoovPosition::Unknown
        }
    }
}

/// Rewrite `video` with the moov atom first, replacing it only on success
pub async fn relocate_moov(toolkit: &dyn MediaToolkit, video: &Path) -> ItemOutcome {
    let temp_path = temp_path_for(video);
    info!("Fixing: {}", video.display());

    let command = toolkit
        .command("Faststart remux")
        .input(video)
        .copy_all()
        .args(["-movflags", "+faststart"])
        .overwrite()
        .output(&temp_path);

    let outcome = match command.capture(None).await {
        Ok(output) if output.status.success() => match replace_original(video, &temp_path).await {
            Ok((before, after)) => {
                return ItemOutcome::succeeded(format!(
                    "Fixed! Size: {:.1}MB → {:.1}MB",
                    megabytes(before),
                    megabytes(after)
                ));
            }
            Err(e) => ItemOutcome::failed(FailureReason::Internal, format!("Error: {}", e)),
        },
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let count = stderr.chars().count();
            let excerpt: String = stderr
                .chars()
                .skip(count.saturating_sub(ERROR_EXCERPT_CHARS))
                .collect();
            ItemOutcome::failed(FailureReason::Tool, format!("ffmpeg error: {}", excerpt))
        }
        Err(e) => ItemOutcome::failed(FailureReason::Internal, format!("Error: {}", e)),
    };

    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path).await {
            warn!("Could not remove {}: {}", temp_path.display(), e);
        }
    }
    outcome
}

async fn replace_original(video: &Path, temp_path: &Path) -> std::io::Result<(u64, u64)> {
    let before = fs::metadata(video).await?.len();
    let after = fs::metadata(temp_path).await?.len();
    fs::rename(temp_path, video).await?;
    debug!("Replaced {} ({} -> {} bytes)", video.display(), before, after);
    Ok((before, after))
}

pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}
