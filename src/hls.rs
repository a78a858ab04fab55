//! HLS pre-transcoding of MKV sources into `<name>.hls/` playlists.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{error, info, warn};

use crate::completion::{has_marker, is_complete};
use crate::config::HlsConfig;
use crate::error::Result;
use crate::media::{MediaCommand, MediaToolkit};
use crate::supervisor::{ProgressRecord, Supervisor, SupervisorLimits, Termination};
use crate::workflow::{FailureReason, ItemOutcome, format_duration};

pub const PLAYLIST_NAME: &str = "playlist.m3u8";
pub const SEGMENT_PATTERN: &str = "segment%03d.ts";
/// Written by the encoder only once the playlist is final
pub const ENDLIST_MARKER: &str = "#EXT-X-ENDLIST";

/// Characters of stderr kept in a tool failure message
const ERROR_EXCERPT_CHARS: usize = 200;

/// `<name>.hls` next to the source, keeping the source extension
pub fn hls_dir_for(source: &Path) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(".hls");
    PathBuf::from(name)
}

pub fn playlist_path_for(source: &Path) -> PathBuf {
    hls_dir_for(source).join(PLAYLIST_NAME)
}

/// A finished playlist at least as new as its source
pub fn is_hls_complete(source: &Path) -> bool {
    is_complete(source, &playlist_path_for(source), Some(ENDLIST_MARKER))
}

/// Turns encoder progress records into periodic log lines
#[derive(Debug)]
pub struct ProgressTracker {
    duration: Option<f64>,
    started: Instant,
    last_log: Instant,
    last_percent: Option<u32>,
    reported_speed: Option<f64>,
    log_interval: Duration,
}

impl ProgressTracker {
    pub fn new(duration: Option<f64>, started: Instant, log_interval: Duration) -> Self {
        Self {
            duration: duration.filter(|d| *d > 0.0),
            started,
            last_log: started,
            last_percent: None,
            reported_speed: None,
            log_interval,
        }
    }

    pub fn observe(&mut self, record: &ProgressRecord) -> Option<String> {
        self.observe_at(record, Instant::now())
    }

    /// Returns a line to log on every new 5% step, or once the log interval has passed
    pub fn observe_at(&mut self, record: &ProgressRecord, now: Instant) -> Option<String> {
        match record.key.as_str() {
            "speed" => {
                self.reported_speed = record
                    .value
                    .trim_end_matches('x')
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s > 0.0);
                None
            }
            // Both keys carry microseconds
            "out_time_ms" | "out_time_us" => {
                let micros = record.value.parse::<i64>().ok().filter(|m| *m > 0)?;
                let duration = self.duration?;
                let position = micros as f64 / 1_000_000.0;
                let elapsed = now.saturating_duration_since(self.started).as_secs_f64();

                let percent = ((position / duration * 100.0) as u32).min(99);
                let step = percent % 5 == 0 && self.last_percent != Some(percent);
                let overdue = now.saturating_duration_since(self.last_log) >= self.log_interval;
                if !step && !overdue {
                    return None;
                }
                self.last_percent = Some(percent);
                self.last_log = now;

                let speed = self
                    .reported_speed
                    .unwrap_or(if elapsed > 0.0 { position / elapsed } else { 0.0 });
                let eta = if speed > 0.0 {
                    format_duration((duration - position).max(0.0) / speed)
                } else {
                    "?".to_string()
                };

                Some(format!(
                    "{}% | {}/{} | Speed: {:.1}x | ETA: {} | Elapsed: {}",
                    percent,
                    format_duration(position),
                    format_duration(duration),
                    speed,
                    eta,
                    format_duration(elapsed)
                ))
            }
            _ => None,
        }
    }
}

pub struct HlsGenerator {
    toolkit: Arc<dyn MediaToolkit>,
    config: HlsConfig,
    supervisor: Supervisor,
}

impl HlsGenerator {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, config: HlsConfig, limits: SupervisorLimits) -> Self {
        Self {
            toolkit,
            config,
            supervisor: Supervisor::new(limits),
        }
    }

    /// Whether a stream with this codec must be re-encoded to H.264
    pub fn needs_transcode(&self, codec: &str) -> bool {
        self.config
            .transcode_codecs
            .iter()
            .any(|c| c.eq_ignore_ascii_case(codec))
    }

    pub fn build_command(&self, source: &Path, hls_dir: &Path, transcode: bool) -> MediaCommand {
        let cfg = &self.config;
        let mut command = self
            .toolkit
            .command("HLS generation")
            .hide_banner()
            .log_level("info")
            .arg("-nostats")
            .progress_to_stdout()
            .input(source)
            .map("0:v:0")
            .map("0:a:0?");

        command = if transcode {
            let mut command = command
                .video_codec("libx264")
                .arg("-preset")
                .arg(&cfg.video_preset)
                .arg("-crf")
                .arg(cfg.video_crf.to_string());
            if let Some(tune) = &cfg.video_tune {
                command = command.arg("-tune").arg(tune);
            }
            command
                .arg("-profile:v")
                .arg(&cfg.video_profile)
                .arg("-level")
                .arg(&cfg.video_level)
                .arg("-pix_fmt")
                .arg(&cfg.pixel_format)
        } else {
            command.copy_video()
        };

        command
            .audio_codec("aac")
            .audio_bitrate(&cfg.audio_bitrate)
            .audio_channels(cfg.audio_channels)
            .audio_sample_rate(cfg.audio_sample_rate)
            .args(["-f", "hls"])
            .arg("-hls_time")
            .arg(cfg.segment_seconds.to_string())
            .args(["-hls_list_size", "0", "-hls_segment_type", "mpegts"])
            .arg("-hls_segment_filename")
            .arg(hls_dir.join(SEGMENT_PATTERN).to_string_lossy())
            .args(["-hls_flags", "independent_segments"])
            .output(hls_dir.join(PLAYLIST_NAME))
    }

    /// Produce the playlist for one source.
    ///
    /// Never fails: every error ends up in the outcome, and any non-success
    /// leaves no output directory behind.
    pub async fn generate(&self, source: &Path, force: bool, position: usize, total: usize) -> ItemOutcome {
        let name = display_name(source);

        if !force && is_hls_complete(source) {
            info!("[{}/{}] Skipping (exists): {}", position, total, name);
            return ItemOutcome::skipped("Already exists (skipped)".to_string());
        }

        let hls_dir = hls_dir_for(source);
        match self.encode(source, &hls_dir, position, total).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[{}/{}] {}: {}", position, total, name, e);
                remove_partial(&hls_dir).await;
                ItemOutcome::failed(FailureReason::Internal, format!("Error: {}", e))
            }
        }
    }

    async fn encode(&self, source: &Path, hls_dir: &Path, position: usize, total: usize) -> Result<ItemOutcome> {
        let name = display_name(source);

        // Leftover segments from an older run must not survive into the new playlist
        if hls_dir.exists() {
            fs::remove_dir_all(hls_dir).await?;
        }
        fs::create_dir_all(hls_dir).await?;

        let codec = self.toolkit.video_codec(source).await.unwrap_or_else(|e| {
            warn!("Could not probe codec of {}: {}", name, e);
            "unknown".to_string()
        });
        let duration = self.toolkit.duration(source).await.unwrap_or_else(|e| {
            warn!("Could not probe duration of {}: {}", name, e);
            None
        });
        let transcode = self.needs_transcode(&codec);

        info!("[{}/{}] Starting: {}", position, total, name);
        if let Some(duration) = duration {
            info!("  Duration: {}", format_duration(duration));
        }
        info!(
            "  Codec: {} -> {}",
            codec,
            if transcode { "transcoding to H.264" } else { "copying video stream" }
        );

        let command = self.build_command(source, hls_dir, transcode);
        let interval = Duration::from_secs(self.config.progress_log_interval_secs.max(1));
        let mut tracker = ProgressTracker::new(duration, Instant::now(), interval);

        let session = self
            .supervisor
            .run(&command, |record| {
                if let Some(line) = tracker.observe(record) {
                    info!("  [{}] {}", name, line);
                }
            })
            .await?;
        let took = format_duration(session.elapsed.as_secs_f64());

        let outcome = match session.termination {
            Termination::Completed if has_marker(&playlist_path_for(source), ENDLIST_MARKER) => {
                if !is_hls_complete(source) {
                    warn!(
                        "{} is dated after its new playlist; check the system clock",
                        source.display()
                    );
                }
                info!("[{}/{}] Done: {} in {}", position, total, name, took);
                return Ok(ItemOutcome::succeeded(format!(
                    "Generated ({}) in {}",
                    if transcode { "transcoded" } else { "remuxed" },
                    took
                )));
            }
            Termination::Completed => ItemOutcome::failed(
                FailureReason::Tool,
                "ffmpeg error: playlist was not finalized".to_string(),
            ),
            Termination::TimedOut => {
                ItemOutcome::failed(FailureReason::Timeout, format!("Timeout after {}", took))
            }
            Termination::Stalled { idle } => ItemOutcome::failed(
                FailureReason::Stall,
                format!("Stalled: no progress for {}s (after {})", idle.as_secs(), took),
            ),
            Termination::Failed { .. } => ItemOutcome::failed(
                FailureReason::Tool,
                format!("ffmpeg error: {}", session.stderr_excerpt(ERROR_EXCERPT_CHARS)),
            ),
        };

        warn!("[{}/{}] {}: {}", position, total, name, outcome.message);
        remove_partial(hls_dir).await;
        Ok(outcome)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn remove_partial(hls_dir: &Path) {
    if !hls_dir.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(hls_dir).await {
        warn!("Could not remove partial output {}: {}", hls_dir.display(), e);
    }
}
