//! mediaprep - media library preparation for web playback
//!
//! Entry point: logging, configuration, and dispatch to the batch commands.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mediaprep::cli::{Args, Commands, ScanArgs};
use mediaprep::config::{Config, DEFAULT_CONFIG_FILE};
use mediaprep::setup;
use mediaprep::workflow::{BatchOptions, Workflow};

/// Exit status for errors that stop the run before or between items
const FATAL_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Keep the file writer flushing until main returns
    let (_guard, logging) = match setup_logging(args.verbose) {
        Ok(guard) => (guard, true),
        Err(e) => {
            eprintln!("Warning: logging could not be initialized: {:#}", e);
            (None, false)
        }
    };

    match run(args).await {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            error!("{:#}", e);
            if !logging {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(FATAL_EXIT)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let mut config = load_config(args.config.as_deref())?;

    let options = |scan: &ScanArgs, config: &Config| BatchOptions {
        root: scan
            .directory
            .clone()
            .unwrap_or_else(|| config.scan.media_dir.clone()),
        skip_patterns: scan.skip.clone(),
        assume_yes: args.yes,
        dry_run: args.dry_run,
    };

    let summary = match &args.command {
        Commands::Vtt { scan, file, force } => {
            info!("Converting SRT subtitles to WebVTT");
            let workflow = Workflow::new(config.clone(), options(scan, &config));
            workflow.convert_vtt(file.as_deref(), *force).await?
        }
        Commands::Faststart { scan } => {
            info!("Fixing MP4 files for progressive streaming");
            let workflow = Workflow::new(config.clone(), options(scan, &config));
            workflow.fix_faststart().await?
        }
        Commands::Hls {
            scan,
            force,
            parallel,
            timeout,
            stall_timeout,
        } => {
            info!("Pre-transcoding MKV files to HLS");
            if let Some(minutes) = timeout {
                config.supervisor.timeout_minutes = *minutes;
            }
            if let Some(seconds) = stall_timeout {
                config.supervisor.stall_timeout_secs = *seconds;
            }
            let workflow = Workflow::new(config.clone(), options(scan, &config));
            workflow.generate_hls(*force, *parallel).await?
        }
        Commands::Subtitles {
            scan,
            model,
            language,
            force,
        } => {
            info!("Generating subtitles with whisper");
            if let Some(model) = model {
                config.transcriber.model = *model;
            }
            if let Some(language) = language {
                config.transcriber.language = Some(language.clone());
            }
            let workflow = Workflow::new(config.clone(), options(scan, &config));
            workflow.generate_subtitles(*force).await?
        }
        Commands::Thumbnails { scan, force } => {
            info!("Generating video thumbnails");
            let workflow = Workflow::new(config.clone(), options(scan, &config));
            workflow.generate_thumbnails(*force).await?
        }
    };

    info!(
        "Finished: {} succeeded, {} skipped, {} failed",
        summary.succeeded, summary.skipped, summary.failed
    );
    Ok(summary.exit_status())
}

/// `--config` if given, else `mediaprep.toml` in the working directory, else defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
            Config::from_file(DEFAULT_CONFIG_FILE)?
        }
        None => Config::default(),
    };
    Ok(config)
}

/// `.mediaprep/log` under `base`, created if needed; `None` when it cannot be
fn prepare_log_dir(base: &Path) -> Option<PathBuf> {
    let log_dir = setup::log_dir(base);
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => Some(log_dir),
        Err(e) => {
            eprintln!(
                "Warning: cannot write logs to {} ({}), logging to console only",
                log_dir.display(),
                e
            );
            None
        }
    }
}

/// Setup logging to the console and, when its directory is writable, a file
fn setup_logging(verbose: bool) -> Result<Option<WorkerGuard>> {
    let log_dir = std::env::current_dir()
        .ok()
        .and_then(|base| prepare_log_dir(&base));

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so listings on stdout stay clean
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(verbose)
        .with_file(verbose)
        .with_line_number(verbose);

    // Set up file appender with daily rotation
    let (file_layer, guard) = match &log_dir {
        Some(log_dir) => {
            let (non_blocking_file, guard) = non_blocking(rolling::daily(log_dir, "mediaprep.log"));
            let layer = fmt::layer()
                .with_writer(non_blocking_file)
                .with_target(false)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false); // No ANSI colors in file
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    match &log_dir {
        Some(log_dir) => info!(
            "Logging initialized - console: {}, file: {}",
            log_level,
            log_dir.join("mediaprep.log").display()
        ),
        None => info!("Logging initialized - console: {}", log_level),
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_is_created_under_base() {
        let temp = tempfile::tempdir().unwrap();
        let dir = prepare_log_dir(temp.path()).unwrap();
        assert!(dir.is_dir());
        assert!(dir.ends_with(".mediaprep/log"));
    }

    #[test]
    fn unwritable_log_dir_falls_back_to_console() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        assert_eq!(prepare_log_dir(&blocker), None);
    }
}
