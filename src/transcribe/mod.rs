// Speech transcription
//
// The `Transcriber` trait is the seam between subtitle generation and the
// speech model. `whisper` drives the openai-whisper command-line tool.

pub mod whisper;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::TranscriberConfig;
use crate::error::Result;

/// Whisper model sizes, smallest and fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    /// Fastest, least accurate
    Tiny,
    /// Fast, decent accuracy
    Base,
    /// Good balance
    Small,
    /// More accurate, slower
    Medium,
    /// Most accurate, very slow
    Large,
}

impl WhisperModel {
    /// Name the speech model loads the weights by
    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::Large => "large",
        }
    }
}

impl fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped piece of recognized speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub language: Option<String>,
    pub segments: Vec<TranscriptSegment>,
}

/// Main trait for transcription operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio track of a media file
    async fn transcribe(&self, media_path: &Path) -> Result<Transcription>;

    /// Fail unless the speech model can be invoked
    async fn check_availability(&self) -> Result<()>;

    /// Model size used for every file
    fn model(&self) -> WhisperModel;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    /// Create the default transcriber (openai-whisper CLI)
    pub fn create(config: TranscriberConfig) -> Arc<dyn Transcriber> {
        Arc::new(whisper::WhisperCliTranscriber::new(config))
    }
}
