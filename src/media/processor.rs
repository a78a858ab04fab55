use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use super::{MediaCommand, MediaCommandBuilder, MediaToolkit};
use crate::config::MediaConfig;
use crate::error::{MediaPrepError, Result};

/// Concrete toolkit implementation backed by ffmpeg and ffprobe
pub struct FfmpegToolkit {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegToolkit {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.ffmpeg_path, &config.ffprobe_path);

        Self {
            config,
            command_builder,
        }
    }

    async fn query(&self, command: MediaCommand) -> Result<String> {
        let output = command.capture(Some(self.config.probe_timeout())).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaPrepError::Media(format!(
                "{} failed: {}",
                command.description,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn video_codec(&self, path: &Path) -> Result<String> {
        let stdout = self.query(self.command_builder.probe_video_codec(path)).await?;
        parse_codec_name(&stdout).ok_or_else(|| {
            MediaPrepError::Media(format!("No video stream in {}", path.display()))
        })
    }

    async fn duration(&self, path: &Path) -> Result<Option<f64>> {
        let stdout = self.query(self.command_builder.probe_duration(path)).await?;
        let duration = parse_duration(&stdout);
        debug!("Probed duration of {}: {:?}", path.display(), duration);
        Ok(duration)
    }

    async fn atom_trace(&self, path: &Path) -> Result<String> {
        // Trace output goes to stderr; exit status is irrelevant for partially readable files
        let output = self
            .command_builder
            .probe_atom_trace(path)
            .capture(Some(self.config.probe_timeout()))
            .await?;
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }

    async fn check_availability(&self) -> Result<()> {
        for command in self.command_builder.version_checks() {
            let output = command.capture(Some(self.config.probe_timeout())).await.map_err(|_| {
                missing_toolkit(&command.binary_path)
            })?;

            if !output.status.success() {
                return Err(missing_toolkit(&command.binary_path));
            }

            let version = String::from_utf8_lossy(&output.stdout);
            info!(
                "Found {}",
                version.lines().next().unwrap_or(command.binary_path.as_str())
            );
        }
        Ok(())
    }

    fn command(&self, description: &str) -> MediaCommand {
        self.command_builder.ffmpeg(description)
    }
}

fn missing_toolkit(binary: &str) -> MediaPrepError {
    MediaPrepError::MissingDependency {
        tool: binary.to_string(),
        hint: [
            "Install it with:",
            "  Ubuntu/Debian: sudo apt install ffmpeg",
            "  macOS: brew install ffmpeg",
            "  Windows: Download from https://ffmpeg.org/download.html",
        ]
        .join("\n"),
    }
}

/// First non-empty line of a codec query, lowercased
pub fn parse_codec_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_lowercase)
}

/// Positive, finite duration from a duration query
pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}
