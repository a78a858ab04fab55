use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::completion::is_complete;
use crate::config::ThumbnailConfig;
use crate::media::{MediaCommand, MediaToolkit};
use crate::workflow::{FailureReason, ItemOutcome};

/// `<stem>.jpg` next to the video
pub fn thumbnail_path_for(video: &Path) -> PathBuf {
    video.with_extension("jpg")
}

/// Seek position in seconds: a fraction of the duration, or a fixed fallback
pub fn seek_position(duration: Option<f64>, config: &ThumbnailConfig) -> f64 {
    match duration {
        Some(duration) if duration > 0.0 => duration * config.position_ratio,
        _ => config.fallback_seconds,
    }
}

pub struct ThumbnailExtractor {
    toolkit: Arc<dyn MediaToolkit>,
    config: ThumbnailConfig,
}

impl ThumbnailExtractor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, config: ThumbnailConfig) -> Self {
        Self { toolkit, config }
    }

    pub fn build_command(&self, video: &Path, output: &Path, seconds: f64) -> MediaCommand {
        self.toolkit
            .command("Thumbnail extraction")
            .hide_banner()
            .log_level("error")
            .seek(seconds)
            .input(video)
            .args(["-vframes", "1"])
            .video_filter(format!("scale={}:-1", self.config.width))
            .arg("-q:v")
            .arg(self.config.quality.to_string())
            .overwrite()
            .output(output)
    }

    /// Write one frame of `video` as its thumbnail
    pub async fn extract(&self, video: &Path, force: bool) -> ItemOutcome {
        let output = thumbnail_path_for(video);

        if !force && is_complete(video, &output, None) {
            return ItemOutcome::skipped("Thumbnail already exists (skipped)".to_string());
        }

        // A stale thumbnail must not pass for this run's output
        if output.exists() {
            if let Err(e) = fs::remove_file(&output).await {
                return ItemOutcome::failed(
                    FailureReason::Internal,
                    format!("Error: could not replace {}: {}", output.display(), e),
                );
            }
        }

        let duration = self.toolkit.duration(video).await.unwrap_or_else(|e| {
            warn!("Could not get duration of {}: {}", video.display(), e);
            None
        });
        let seconds = seek_position(duration, &self.config);
        match duration {
            Some(total) => info!("Extracting frame at {:.1}s ({:.1}s total)", seconds, total),
            None => info!("Extracting frame at {:.1}s (default)", seconds),
        }

        match self.build_command(video, &output, seconds).execute().await {
            Ok(()) if output.is_file() => {
                let name = output
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ItemOutcome::succeeded(format!("Saved: {}", name))
            }
            Ok(()) => {
                ItemOutcome::failed(FailureReason::Tool, "ffmpeg wrote no frame".to_string())
            }
            Err(e) => {
                if output.exists() {
                    if let Err(e) = fs::remove_file(&output).await {
                        warn!("Could not remove partial {}: {}", output.display(), e);
                    }
                }
                ItemOutcome::failed(
                    FailureReason::Tool,
                    format!("Error generating thumbnail: {}", e),
                )
            }
        }
    }
}
