//! mediaprep - batch preparation of a local media library for web playback
//!
//! Converts SRT subtitles to WebVTT, relocates MP4 moov atoms, pre-transcodes
//! MKV files to HLS under timeout and stall supervision, generates subtitles
//! with whisper and extracts thumbnails, all using ffmpeg and ffprobe.

pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod faststart;
pub mod hls;
pub mod media;
pub mod pool;
pub mod scan;
pub mod setup;
pub mod subtitle;
pub mod supervisor;
pub mod thumbnail;
pub mod transcribe;
pub mod workflow;
