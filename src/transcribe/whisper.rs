// openai-whisper command-line implementation

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Transcriber, TranscriptSegment, Transcription, WhisperModel};
use crate::config::TranscriberConfig;
use crate::error::{MediaPrepError, Result};

/// JSON document written by `whisper --output_format json`
#[derive(Debug, Deserialize)]
pub struct WhisperOutput {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
pub struct WhisperSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub text: String,
}

impl From<WhisperOutput> for Transcription {
    fn from(output: WhisperOutput) -> Self {
        Transcription {
            language: output.language,
            segments: output
                .segments
                .into_iter()
                .map(|seg| TranscriptSegment {
                    start: seg.start,
                    end: seg.end,
                    text: seg.text.trim().to_string(),
                })
                .collect(),
        }
    }
}

/// Parse whisper's JSON output into a transcription
pub fn parse_whisper_json(json: &str) -> Result<Transcription> {
    let output: WhisperOutput = serde_json::from_str(json)?;
    Ok(output.into())
}

/// Transcriber that shells out to the `whisper` command
pub struct WhisperCliTranscriber {
    config: TranscriberConfig,
}

impl WhisperCliTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, media_path: &Path) -> Result<Transcription> {
        let temp_dir = tempfile::tempdir().map_err(|e| {
            MediaPrepError::Transcriber(format!("Failed to create temp directory: {}", e))
        })?;
        let output_dir = temp_dir.path();

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(media_path)
            .arg("--model")
            .arg(self.config.model.as_str())
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("json")
            .arg("--verbose")
            .arg("False");

        if let Some(lang) = &self.config.language {
            cmd.arg("--language").arg(lang);
        }

        cmd.stdin(Stdio::null()).kill_on_drop(true);
        debug!("Executing whisper command: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| {
            MediaPrepError::Transcriber(format!("Failed to execute whisper: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaPrepError::Transcriber(format!(
                "Whisper failed: {}",
                stderr.trim()
            )));
        }

        let stem = media_path
            .file_stem()
            .ok_or_else(|| MediaPrepError::Transcriber("Invalid media filename".to_string()))?;
        let json_file = output_dir.join(format!("{}.json", stem.to_string_lossy()));

        let json_content = tokio::fs::read_to_string(&json_file).await.map_err(|e| {
            MediaPrepError::Transcriber(format!("Failed to read whisper output: {}", e))
        })?;

        let transcription = parse_whisper_json(&json_content)?;
        info!(
            "Transcribed {} segments (language: {})",
            transcription.segments.len(),
            transcription.language.as_deref().unwrap_or("unknown")
        );
        Ok(transcription)
    }

    async fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.config.binary_path)
            .arg("--help")
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                info!("Whisper command-line tool is available");
                Ok(())
            }
            _ => Err(MediaPrepError::MissingDependency {
                tool: self.config.binary_path.clone(),
                hint: [
                    "Install it with:",
                    "  pip3 install openai-whisper",
                    "Note: This will also install PyTorch, which is large (~2GB)",
                ]
                .join("\n"),
            }),
        }
    }

    fn model(&self) -> WhisperModel {
        self.config.model
    }
}
