use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::completion::is_complete;
use crate::config::Config;
use crate::error::Result;
use crate::faststart::{self, MoovPosition};
use crate::hls::{self, HlsGenerator};
use crate::media::{MediaToolkit, MediaToolkitFactory};
use crate::pool::{Completed, WorkerPool};
use crate::scan::{MKV_EXTENSIONS, MP4_EXTENSIONS, SRT_EXTENSIONS, ScanEntry, Scanner, VIDEO_EXTENSIONS};
use crate::setup::{Requirement, SetupManager};
use crate::subtitle;
use crate::supervisor::SupervisorLimits;
use crate::thumbnail::{self, ThumbnailExtractor};
use crate::transcribe::{Transcriber, TranscriberFactory};

/// Why an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The external tool exited with an error
    Tool,
    /// Killed by the wall-clock limit
    Timeout,
    /// Killed for producing no progress
    Stall,
    /// Anything else, including a crashed worker
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Skipped,
    Failed(FailureReason),
}

/// Result of processing one file, with a short human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub status: OutcomeStatus,
    pub message: String,
}

impl ItemOutcome {
    pub fn succeeded(message: String) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            message,
        }
    }

    pub fn skipped(message: String) -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            message,
        }
    }

    pub fn failed(reason: FailureReason, message: String) -> Self {
        Self {
            status: OutcomeStatus::Failed(reason),
            message,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }
}

/// Counts for one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome.status {
            OutcomeStatus::Succeeded => self.succeeded += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed(_) => self.failed += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Process exit status: 1 when any item failed
    pub fn exit_status(&self) -> u8 {
        if self.has_failures() { 1 } else { 0 }
    }
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour up
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Only an explicit `y` proceeds
pub fn is_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

/// Ask a `[y/N]` question on the terminal; end of input means no
pub async fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    let read = BufReader::new(tokio::io::stdin()).read_line(&mut answer).await?;
    Ok(read > 0 && is_yes(&answer))
}

/// Settings shared by every batch command
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub root: PathBuf,
    pub skip_patterns: Vec<String>,
    pub assume_yes: bool,
    pub dry_run: bool,
}

/// Files sorted into work, already-done and excluded
#[derive(Debug, Default)]
struct Plan {
    pending: Vec<ScanEntry>,
    done: usize,
    excluded: usize,
}

impl Plan {
    fn pending(&mut self, entry: ScanEntry, note: Option<String>) {
        match note {
            Some(note) => println!("  [PENDING] {} ({})", entry, note),
            None => println!("  [PENDING] {}", entry),
        }
        self.pending.push(entry);
    }

    fn done(&mut self, entry: &ScanEntry, label: &str) {
        println!("  [{}] {}", label, entry);
        self.done += 1;
    }

    fn exclude(&mut self, entry: &ScanEntry, label: &str) {
        println!("  [{}] {}", label, entry);
        self.excluded += 1;
    }
}

/// Runs each media preparation command over a directory tree
pub struct Workflow {
    config: Config,
    options: BatchOptions,
    toolkit: Arc<dyn MediaToolkit>,
    transcriber: Arc<dyn Transcriber>,
    setup: SetupManager,
}

impl Workflow {
    pub fn new(config: Config, options: BatchOptions) -> Self {
        let toolkit = MediaToolkitFactory::create(config.media.clone());
        let transcriber = TranscriberFactory::create(config.transcriber.clone());
        Self::with_components(config, options, toolkit, transcriber)
    }

    pub fn with_components(
        config: Config,
        options: BatchOptions,
        toolkit: Arc<dyn MediaToolkit>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let setup = SetupManager::new(Arc::clone(&toolkit), Arc::clone(&transcriber));
        Self {
            config,
            options,
            toolkit,
            transcriber,
            setup,
        }
    }

    /// Convert SRT subtitles to WebVTT, for one file or the whole tree
    pub async fn convert_vtt(&self, file: Option<&Path>, force: bool) -> Result<BatchSummary> {
        if let Some(file) = file {
            subtitle::check_srt_path(file)?;
            if self.options.dry_run {
                println!("Would convert: {}", file.display());
                println!("Dry run: no files were changed.");
                return Ok(BatchSummary::default());
            }
            let outcome = subtitle::convert_one(file, force).await;
            println!("{}: {}", file.display(), outcome.message);

            let mut summary = BatchSummary::default();
            summary.record(&outcome);
            return Ok(summary);
        }

        let entries = self.scan(SRT_EXTENSIONS)?;
        println!("\nSRT files in {}:", self.options.root.display());

        let mut plan = Plan::default();
        for entry in entries {
            if entry.skipped {
                plan.exclude(&entry, "SKIP");
            } else if !force && subtitle::has_fresh_vtt(&entry.path) {
                plan.done(&entry, "DONE");
            } else {
                plan.pending(entry, None);
            }
        }

        self.run_batch("SRT to VTT conversion", plan, 1, move |entry: ScanEntry, _, _| async move {
            subtitle::convert_one(&entry.path, force).await
        })
        .await
    }

    /// Move the moov atom to the front of every MP4 that has it at the end
    pub async fn fix_faststart(&self) -> Result<BatchSummary> {
        self.setup.ensure(&[Requirement::MediaToolkit]).await?;

        let entries = self.scan(MP4_EXTENSIONS)?;
        println!("\nChecking MP4 files in {}:", self.options.root.display());

        let mut plan = Plan::default();
        for entry in entries {
            if entry.skipped {
                plan.exclude(&entry, "SKIP");
                continue;
            }
            match faststart::moov_position(self.toolkit.as_ref(), &entry.path).await {
                MoovPosition::Start => plan.done(&entry, "OK"),
                MoovPosition::End => {
                    let size = std::fs::metadata(&entry.path).map(|m| m.len()).unwrap_or(0);
                    plan.pending(entry, Some(format!("{:.1}MB", faststart::megabytes(size))));
                }
                MoovPosition::Unknown => plan.exclude(&entry, "UNKNOWN"),
            }
        }

        if !plan.pending.is_empty() {
            println!("\nThis rewrites the original files in place (no quality loss).");
        }

        let toolkit = Arc::clone(&self.toolkit);
        self.run_batch("Faststart fix", plan, 1, move |entry: ScanEntry, _, _| {
            let toolkit = Arc::clone(&toolkit);
            async move { faststart::relocate_moov(toolkit.as_ref(), &entry.path).await }
        })
        .await
    }

    /// Pre-transcode MKV files into HLS playlists
    pub async fn generate_hls(&self, force: bool, parallel: usize) -> Result<BatchSummary> {
        self.setup.ensure(&[Requirement::MediaToolkit]).await?;

        let entries = self.scan(MKV_EXTENSIONS)?;
        println!("\nMKV files in {}:", self.options.root.display());

        let mut plan = Plan::default();
        for entry in entries {
            if entry.skipped {
                plan.exclude(&entry, "SKIP");
            } else if !force && hls::is_hls_complete(&entry.path) {
                plan.done(&entry, "DONE");
            } else {
                let duration = self.toolkit.duration(&entry.path).await.ok().flatten();
                let note = duration
                    .map(format_duration)
                    .unwrap_or_else(|| "unknown duration".to_string());
                plan.pending(entry, Some(note));
            }
        }

        let limits = SupervisorLimits::from_config(&self.config.supervisor);
        println!(
            "\nTimeout: {} | Stall timeout: {} | Parallel: {}",
            limits
                .absolute
                .map(|d| format_duration(d.as_secs_f64()))
                .unwrap_or_else(|| "none".to_string()),
            limits
                .stall
                .map(|d| format!("{}s", d.as_secs()))
                .unwrap_or_else(|| "none".to_string()),
            parallel.max(1)
        );

        let generator = Arc::new(HlsGenerator::new(
            Arc::clone(&self.toolkit),
            self.config.hls.clone(),
            limits,
        ));
        self.run_batch("HLS generation", plan, parallel, move |entry: ScanEntry, position, total| {
            let generator = Arc::clone(&generator);
            async move { generator.generate(&entry.path, force, position, total).await }
        })
        .await
    }

    /// Transcribe videos into sibling WebVTT subtitles
    pub async fn generate_subtitles(&self, force: bool) -> Result<BatchSummary> {
        self.setup.ensure(&[Requirement::Transcriber]).await?;

        let entries = self.scan(VIDEO_EXTENSIONS)?;
        println!(
            "\nVideos in {} (model: {}):",
            self.options.root.display(),
            self.transcriber.model()
        );

        let mut plan = Plan::default();
        for entry in entries {
            if entry.skipped {
                plan.exclude(&entry, "SKIP");
            } else if !force && subtitle::has_fresh_vtt(&entry.path) {
                plan.done(&entry, "DONE");
            } else {
                plan.pending(entry, None);
            }
        }

        let transcriber = Arc::clone(&self.transcriber);
        self.run_batch("Subtitle generation", plan, 1, move |entry: ScanEntry, _, _| {
            let transcriber = Arc::clone(&transcriber);
            async move { subtitle::generate_for_video(transcriber.as_ref(), &entry.path, force).await }
        })
        .await
    }

    /// Extract one JPEG frame per video
    pub async fn generate_thumbnails(&self, force: bool) -> Result<BatchSummary> {
        self.setup.ensure(&[Requirement::MediaToolkit]).await?;

        let entries = self.scan(VIDEO_EXTENSIONS)?;
        println!("\nVideos in {}:", self.options.root.display());

        let mut plan = Plan::default();
        for entry in entries {
            if entry.skipped {
                plan.exclude(&entry, "SKIP");
            } else if !force && is_complete(&entry.path, &thumbnail::thumbnail_path_for(&entry.path), None) {
                plan.done(&entry, "DONE");
            } else {
                plan.pending(entry, None);
            }
        }

        let extractor = Arc::new(ThumbnailExtractor::new(
            Arc::clone(&self.toolkit),
            self.config.thumbnail.clone(),
        ));
        self.run_batch("Thumbnail generation", plan, 1, move |entry: ScanEntry, _, _| {
            let extractor = Arc::clone(&extractor);
            async move { extractor.extract(&entry.path, force).await }
        })
        .await
    }

    fn scan(&self, extensions: &[&str]) -> Result<Vec<ScanEntry>> {
        info!(
            "Scanning {} for {} files",
            self.options.root.display(),
            extensions.join("/")
        );
        Scanner::new(&self.options.root, extensions)
            .with_skip_patterns(&self.options.skip_patterns)
            .scan()
    }

    async fn run_batch<F, Fut>(&self, title: &str, plan: Plan, parallel: usize, job: F) -> Result<BatchSummary>
    where
        F: Fn(ScanEntry, usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ItemOutcome> + Send + 'static,
    {
        let mut summary = BatchSummary {
            skipped: plan.done + plan.excluded,
            ..Default::default()
        };

        println!("{}", "=".repeat(60));
        println!(
            "Already done: {} | Skipped: {} | To process: {}",
            plan.done,
            plan.excluded,
            plan.pending.len()
        );
        println!("{}", "=".repeat(60));

        if plan.pending.is_empty() {
            println!("Nothing to do.");
            return Ok(summary);
        }
        if self.options.dry_run {
            println!("Dry run: no files were changed.");
            return Ok(summary);
        }

        let prompt = format!("{} for {} file(s)?", title, plan.pending.len());
        if !confirm(&prompt, self.options.assume_yes).await? {
            println!("Cancelled.");
            return Ok(summary);
        }

        info!("Starting {} of {} file(s)", title, plan.pending.len());
        let results = WorkerPool::new(parallel).run(plan.pending, job).await;
        for result in &results {
            summary.record(&result.outcome);
        }

        print_report(title, &summary, &results);
        Ok(summary)
    }
}

fn print_report(title: &str, summary: &BatchSummary, results: &[Completed<ScanEntry>]) {
    println!("\n{}", "=".repeat(60));
    println!("{} complete", title);
    println!("  Successful: {}", summary.succeeded);
    println!("  Skipped: {}", summary.skipped);
    if summary.has_failures() {
        println!("  Failed: {}", summary.failed);
        for result in results.iter().filter(|r| r.outcome.is_failure()) {
            println!("    - {}: {}", result.item, result.outcome.message);
        }
    }
    println!("{}", "=".repeat(60));
}
