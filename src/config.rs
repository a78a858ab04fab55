use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MediaPrepError, Result};
use crate::transcribe::WhisperModel;

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "mediaprep.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub media: MediaConfig,
    pub scan: ScanConfig,
    pub hls: HlsConfig,
    pub supervisor: SupervisorConfig,
    pub thumbnail: ThumbnailConfig,
    pub transcriber: TranscriberConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Upper bound for a single ffprobe query, in seconds
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Media root used when no directory is given on the command line
    pub media_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Video codecs that browsers cannot play inside HLS and must be re-encoded
    pub transcode_codecs: Vec<String>,
    /// Target segment length in seconds
    pub segment_seconds: u32,
    /// x264 settings used when transcoding
    pub video_preset: String,
    pub video_crf: u32,
    pub video_tune: Option<String>,
    pub video_profile: String,
    pub video_level: String,
    pub pixel_format: String,
    /// AAC settings, always applied
    pub audio_bitrate: String,
    pub audio_channels: u32,
    pub audio_sample_rate: u32,
    /// Log progress at least this often, in seconds
    pub progress_log_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wall-clock limit per file in minutes, 0 disables it
    pub timeout_minutes: u64,
    /// Seconds without progress output before the encoder is killed, 0 disables it
    pub stall_timeout_secs: u64,
    /// How often the monitor loop checks both limits
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Output width in pixels; height keeps the aspect ratio
    pub width: u32,
    /// JPEG quality passed to `-q:v` (2-5 is good, lower is better)
    pub quality: u32,
    /// Fraction of the duration at which the frame is taken
    pub position_ratio: f64,
    /// Seek position used when the duration cannot be probed
    pub fallback_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Path to the whisper command-line tool
    pub binary_path: String,
    /// Model size loaded by whisper
    pub model: WhisperModel,
    /// Source language hint, auto-detected when unset
    pub language: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            probe_timeout_secs: 30,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
        }
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            transcode_codecs: ["hevc", "h265", "vp9", "av1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            segment_seconds: 6,
            video_preset: "veryfast".to_string(),
            video_crf: 23,
            video_tune: Some("animation".to_string()),
            video_profile: "high".to_string(),
            video_level: "4.1".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_bitrate: "192k".to_string(),
            audio_channels: 2,
            audio_sample_rate: 48000,
            progress_log_interval_secs: 30,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 0,
            stall_timeout_secs: 120,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 480,
            quality: 2,
            position_ratio: 0.1,
            fallback_seconds: 5.0,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper".to_string(),
            model: WhisperModel::Small,
            language: None,
        }
    }
}

impl MediaConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MediaPrepError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MediaPrepError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| MediaPrepError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.supervisor.poll_interval_ms == 0 {
            return Err(MediaPrepError::Config(
                "supervisor.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.hls.segment_seconds == 0 {
            return Err(MediaPrepError::Config(
                "hls.segment_seconds must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.thumbnail.position_ratio) {
            return Err(MediaPrepError::Config(format!(
                "thumbnail.position_ratio must be within 0.0..=1.0, got {}",
                self.thumbnail.position_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [media]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

            [supervisor]
            stall_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.media.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.media.ffprobe_path, "ffprobe");
        assert_eq!(config.supervisor.stall_timeout_secs, 30);
        assert_eq!(config.supervisor.poll_interval_ms, 1000);
        assert_eq!(config.hls.segment_seconds, 6);
        assert_eq!(config.transcriber.model, WhisperModel::Small);
    }

    #[test]
    fn model_is_read_by_size_name() {
        let config = Config::from_toml("[transcriber]\nmodel = \"medium\"\n").unwrap();
        assert_eq!(config.transcriber.model, WhisperModel::Medium);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Config::from_toml("[supervisor]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, MediaPrepError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml("[hls\nsegment_seconds = 6\n").unwrap_err();
        assert!(matches!(err, MediaPrepError::Toml(_)));
        assert!(err.to_string().starts_with("TOML parsing error"));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);

        let mut config = Config::default();
        config.hls.video_crf = 20;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.hls.video_crf, 20);
        assert_eq!(loaded.hls.transcode_codecs, config.hls.transcode_codecs);
    }
}
