//! Runs a per-item job over pending work, sequentially or with bounded concurrency.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{info, warn};

use crate::workflow::{FailureReason, ItemOutcome, OutcomeStatus};

/// Outcome of one work item, tied to its position in the input
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub index: usize,
    pub item: T,
    pub outcome: ItemOutcome,
}

pub struct WorkerPool {
    parallel: usize,
    progress: ProgressBar,
}

impl WorkerPool {
    /// Pool drawing a batch progress bar on stderr (not drawn when stderr is not a tty)
    pub fn new(parallel: usize) -> Self {
        Self::with_progress(parallel, ProgressBar::new(0))
    }

    /// Pool without any terminal output besides logging
    pub fn hidden(parallel: usize) -> Self {
        Self::with_progress(parallel, ProgressBar::hidden())
    }

    fn with_progress(parallel: usize, progress: ProgressBar) -> Self {
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("#>-"));
        }
        Self {
            parallel: parallel.max(1),
            progress,
        }
    }

    pub fn parallel(&self) -> usize {
        self.parallel
    }

    /// Run `job(item, position, total)` for every item.
    ///
    /// Returns exactly one record per item, ordered by input index. With a
    /// single worker items run and are reported strictly in input order;
    /// otherwise they are reported as they finish. A job that panics yields
    /// a failed outcome for its own item only.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, job: F) -> Vec<Completed<T>>
    where
        T: Clone + Display + Send + 'static,
        F: Fn(T, usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ItemOutcome> + Send + 'static,
    {
        let total = items.len();
        self.progress.set_length(total as u64);
        self.progress.set_position(0);

        let outcomes = if self.parallel == 1 {
            self.run_sequential(&items, job).await
        } else {
            self.run_concurrent(&items, job).await
        };

        self.progress.finish_and_clear();

        items
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (item, outcome))| Completed {
                index,
                item,
                outcome,
            })
            .collect()
    }

    async fn run_sequential<T, F, Fut>(&self, items: &[T], job: F) -> Vec<ItemOutcome>
    where
        T: Clone + Display + Send + 'static,
        F: Fn(T, usize, usize) -> Fut,
        Fut: Future<Output = ItemOutcome> + Send + 'static,
    {
        let total = items.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, item) in items.iter().enumerate() {
            self.progress.set_message(item.to_string());
            let outcome = match tokio::spawn(job(item.clone(), index + 1, total)).await {
                Ok(outcome) => outcome,
                Err(e) => panicked(e),
            };
            self.record(item, &outcome);
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn run_concurrent<T, F, Fut>(&self, items: &[T], job: F) -> Vec<ItemOutcome>
    where
        T: Clone + Display + Send + 'static,
        F: Fn(T, usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ItemOutcome> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let job = Arc::new(job);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, ItemOutcome)>();

        let mut handles = Vec::with_capacity(total);
        for (index, item) in items.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let job = Arc::clone(&job);
            let done_tx = done_tx.clone();

            handles.push(tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => job(item, index + 1, total).await,
                    Err(_) => ItemOutcome::failed(
                        FailureReason::Internal,
                        "Error: worker pool shut down".to_string(),
                    ),
                };
                let _ = done_tx.send((index, outcome));
            }));
        }
        drop(done_tx);

        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; total];
        while let Some((index, outcome)) = done_rx.recv().await {
            self.record(&items[index], &outcome);
            outcomes[index] = Some(outcome);
        }

        for (index, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                if outcomes[index].is_none() {
                    let outcome = panicked(e);
                    self.record(&items[index], &outcome);
                    outcomes[index] = Some(outcome);
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    ItemOutcome::failed(FailureReason::Internal, "Error: no result".to_string())
                })
            })
            .collect()
    }

    fn record<T: Display>(&self, item: &T, outcome: &ItemOutcome) {
        match outcome.status {
            OutcomeStatus::Succeeded => info!("[OK] {}: {}", item, outcome.message),
            OutcomeStatus::Skipped => info!("[SKIP] {}: {}", item, outcome.message),
            OutcomeStatus::Failed(_) => warn!("[FAIL] {}: {}", item, outcome.message),
        }
        self.progress.inc(1);
    }
}

fn panicked(e: tokio::task::JoinError) -> ItemOutcome {
    ItemOutcome::failed(FailureReason::Internal, format!("Error: worker failed: {}", e))
}
