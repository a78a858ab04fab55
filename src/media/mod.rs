// Media toolkit access
//
// This module wraps the external video/audio toolkit:
// - Commands: command builders for ffmpeg and ffprobe invocations
// - Processor: the ffprobe-backed probe implementation

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Stream introspection and command construction for one media toolkit
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Codec name of the first video stream, lowercased
    async fn video_codec(&self, path: &Path) -> Result<String>;

    /// Container duration in seconds, `None` when the toolkit reports none
    async fn duration(&self, path: &Path) -> Result<Option<f64>>;

    /// Raw trace output listing the container's atoms
    async fn atom_trace(&self, path: &Path) -> Result<String>;

    /// Fail unless both toolkit binaries can be executed
    async fn check_availability(&self) -> Result<()>;

    /// Start building an encoder/remuxer command
    fn command(&self, description: &str) -> MediaCommand;
}

/// Factory for creating media toolkit instances
pub struct MediaToolkitFactory;

impl MediaToolkitFactory {
    /// Create the default toolkit implementation (FFmpeg-based)
    pub fn create(config: MediaConfig) -> Arc<dyn MediaToolkit> {
        Arc::new(processor::FfmpegToolkit::new(config))
    }
}
