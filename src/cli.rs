use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::transcribe::WhisperModel;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Do not ask for confirmation before processing
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Show what would be done without doing it
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments shared by every batch command
#[derive(ClapArgs, Debug, Clone)]
pub struct ScanArgs {
    /// Directory to scan (default: the configured media directory)
    pub directory: Option<PathBuf>,

    /// Skip files whose path contains this text (repeatable, case-insensitive)
    #[arg(short, long = "skip", value_name = "PATTERN")]
    pub skip: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert SRT subtitles to WebVTT
    Vtt {
        #[command(flatten)]
        scan: ScanArgs,

        /// Convert a single SRT file instead of scanning a directory
        #[arg(long, value_name = "SRT")]
        file: Option<PathBuf>,

        /// Rewrite VTT files even if they are up to date
        #[arg(short, long)]
        force: bool,
    },

    /// Move the moov atom of MP4 files to the front for progressive playback
    Faststart {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Pre-transcode MKV files into HLS playlists and segments
    Hls {
        #[command(flatten)]
        scan: ScanArgs,

        /// Regenerate HLS even if a complete playlist exists
        #[arg(short, long)]
        force: bool,

        /// Number of files encoded at the same time
        #[arg(short, long, default_value_t = 1)]
        parallel: usize,

        /// Timeout in minutes per file (0 = no timeout)
        #[arg(short, long, value_name = "MINUTES")]
        timeout: Option<u64>,

        /// Kill the encoder after this many seconds without progress (0 = never)
        #[arg(long, value_name = "SECONDS")]
        stall_timeout: Option<u64>,
    },

    /// Generate WebVTT subtitles with a speech recognition model
    Subtitles {
        #[command(flatten)]
        scan: ScanArgs,

        /// Whisper model size (larger is more accurate but slower)
        #[arg(short, long, value_enum)]
        model: Option<WhisperModel>,

        /// Spoken language hint
        #[arg(short, long)]
        language: Option<String>,

        /// Regenerate subtitles even if they are up to date
        #[arg(short, long)]
        force: bool,
    },

    /// Extract a JPEG thumbnail from each video
    Thumbnails {
        #[command(flatten)]
        scan: ScanArgs,

        /// Regenerate thumbnails even if they are up to date
        #[arg(short, long)]
        force: bool,
    },
}
