//! Runs one external encoder invocation under wall-clock and stall limits.
//!
//! The encoder writes `key=value` progress records to stdout. A reader task
//! drains stdout, stamps an [`ActivityClock`] on every line and forwards the
//! parsed records; a second reader keeps the tail of stderr. The monitor loop
//! waits for exit, relays progress and, on every poll tick, kills the process
//! when either limit is exceeded.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::SupervisorConfig;
use crate::error::{MediaPrepError, Result};
use crate::media::MediaCommand;

/// Bytes of stderr kept for failure messages
const STDERR_TAIL_BYTES: usize = 8 * 1024;
/// How long to wait for the output readers once the process is gone
const READER_GRACE: Duration = Duration::from_secs(5);

/// Both timeout policies plus the polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorLimits {
    /// Total wall-clock time allowed
    pub absolute: Option<Duration>,
    /// Time allowed without a progress line
    pub stall: Option<Duration>,
    pub poll_interval: Duration,
}

impl SupervisorLimits {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            absolute: non_zero(Duration::from_secs(config.timeout_minutes.saturating_mul(60))),
            stall: non_zero(Duration::from_secs(config.stall_timeout_secs)),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// One `key=value` record from the progress channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub key: String,
    pub value: String,
}

pub fn parse_progress_line(line: &str) -> Option<ProgressRecord> {
    let (key, value) = line.trim().split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some(ProgressRecord {
        key: key.to_string(),
        value: value.trim().to_string(),
    })
}

/// How a supervised session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Exited with status zero
    Completed,
    /// Exited on its own with a failure status; `None` when killed by a signal
    Failed { code: Option<i32> },
    /// Killed after exceeding the wall-clock limit
    TimedOut,
    /// Killed after producing no progress for `idle`
    Stalled { idle: Duration },
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub termination: Termination,
    pub elapsed: Duration,
    /// Last few kilobytes the process wrote to stderr
    pub stderr_tail: String,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Completed
    }

    /// The last `max_chars` characters of stderr, trimmed
    pub fn stderr_excerpt(&self, max_chars: usize) -> String {
        let tail = self.stderr_tail.trim();
        let count = tail.chars().count();
        tail.chars().skip(count.saturating_sub(max_chars)).collect()
    }
}

/// Time of the most recent output, shared by the reader and the monitor
#[derive(Debug)]
struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    fn new(origin: Instant) -> Self {
        Self {
            origin,
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Bounded buffer keeping the end of a text stream
#[derive(Debug)]
struct TailBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let chunk = &chunk[chunk.len().saturating_sub(self.capacity)..];
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    fn into_string(self) -> String {
        let bytes: Vec<u8> = self.bytes.into();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

pub struct Supervisor {
    limits: SupervisorLimits,
}

impl Supervisor {
    pub fn new(limits: SupervisorLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SupervisorLimits {
        &self.limits
    }

    /// Run `command` until it exits or a limit kills it.
    ///
    /// `on_progress` sees every progress record in arrival order. Only
    /// failures to start or wait on the process are returned as errors.
    pub async fn run<F>(&self, command: &MediaCommand, mut on_progress: F) -> Result<SessionOutcome>
    where
        F: FnMut(&ProgressRecord),
    {
        debug!("Supervising {}: {} {:?}", command.description, command.binary_path, command.args);

        let started = Instant::now();
        let mut child = command
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MediaPrepError::Supervisor(format!("Failed to start {}: {}", command.binary_path, e))
            })?;

        let clock = Arc::new(ActivityClock::new(started));
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaPrepError::Supervisor("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaPrepError::Supervisor("stderr was not captured".to_string()))?;

        let stdout_task = spawn_progress_reader(stdout, Arc::clone(&clock), progress_tx);
        let stderr_task = spawn_tail_reader(stderr);

        let mut ticker = tokio::time::interval(self.limits.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let termination = loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    break if status.success() {
                        Termination::Completed
                    } else {
                        Termination::Failed { code: status.code() }
                    };
                }
                Some(record) = progress_rx.recv() => on_progress(&record),
                _ = ticker.tick() => {
                    if let Some(limit) = self.limits.absolute {
                        if started.elapsed() > limit {
                            warn!("{} exceeded {}s, killing process", command.description, limit.as_secs());
                            kill(&mut child).await;
                            break Termination::TimedOut;
                        }
                    }
                    if let Some(limit) = self.limits.stall {
                        let idle = clock.idle();
                        if idle > limit {
                            warn!("{} produced no progress for {}s, killing process", command.description, idle.as_secs());
                            kill(&mut child).await;
                            break Termination::Stalled { idle };
                        }
                    }
                }
            }
        };
        let elapsed = started.elapsed();

        join_reader(stdout_task).await;
        while let Ok(record) = progress_rx.try_recv() {
            on_progress(&record);
        }
        let stderr_tail = join_reader(stderr_task).await.unwrap_or_default();

        debug!("{} ended after {:?}: {:?}", command.description, elapsed, termination);
        Ok(SessionOutcome {
            termination,
            elapsed,
            stderr_tail,
        })
    }
}

fn spawn_progress_reader<R>(
    stream: R,
    clock: Arc<ActivityClock>,
    progress_tx: mpsc::UnboundedSender<ProgressRecord>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    clock.touch();
                    if let Some(record) = parse_progress_line(&String::from_utf8_lossy(&line)) {
                        // Keep draining even if nobody listens any more
                        let _ = progress_tx.send(record);
                    }
                }
            }
        }
    })
}

fn spawn_tail_reader<R>(stream: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut tail = TailBuffer::new(STDERR_TAIL_BYTES);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => tail.push(&line),
            }
        }
        tail.into_string()
    })
}

async fn join_reader<T>(mut handle: JoinHandle<T>) -> Option<T> {
    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            None
        }
        Err(_) => {
            // A grandchild may still hold the pipe open
            handle.abort();
            None
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill process: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> MediaCommand {
        MediaCommand::new("sh", "test encoder").args(["-c", script])
    }

    fn limits(absolute: Option<u64>, stall: Option<u64>) -> SupervisorLimits {
        SupervisorLimits {
            absolute: absolute.map(Duration::from_secs),
            stall: stall.map(Duration::from_secs),
            poll_interval: Duration::from_millis(100),
        }
    }

    #[test]
    fn progress_lines_split_on_first_equals() {
        assert_eq!(
            parse_progress_line("out_time=00:00:01.000000\n"),
            Some(ProgressRecord {
                key: "out_time".to_string(),
                value: "00:00:01.000000".to_string()
            })
        );
        assert_eq!(parse_progress_line("no separator"), None);
        assert_eq!(parse_progress_line("=orphan"), None);
    }

    #[test]
    fn zero_limits_are_disabled() {
        let limits = SupervisorLimits::from_config(&SupervisorConfig {
            timeout_minutes: 0,
            stall_timeout_secs: 0,
            poll_interval_ms: 250,
        });
        assert_eq!(limits.absolute, None);
        assert_eq!(limits.stall, None);
        assert_eq!(limits.poll_interval, Duration::from_millis(250));

        let limits = SupervisorLimits::from_config(&SupervisorConfig {
            timeout_minutes: 2,
            stall_timeout_secs: 30,
            poll_interval_ms: 1000,
        });
        assert_eq!(limits.absolute, Some(Duration::from_secs(120)));
        assert_eq!(limits.stall, Some(Duration::from_secs(30)));
    }

    #[test]
    fn huge_timeout_saturates() {
        let limits = SupervisorLimits::from_config(&SupervisorConfig {
            timeout_minutes: u64::MAX / 10,
            stall_timeout_secs: 120,
            poll_interval_ms: 1000,
        });
        assert_eq!(limits.absolute, Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn tail_buffer_keeps_the_end() {
        let mut tail = TailBuffer::new(8);
        tail.push(b"abcdef");
        tail.push(b"ghij");
        assert_eq!(tail.into_string(), "cdefghij");

        let mut tail = TailBuffer::new(4);
        tail.push(b"0123456789");
        assert_eq!(tail.into_string(), "6789");
    }

    #[tokio::test]
    async fn completed_run_relays_progress() {
        let supervisor = Supervisor::new(limits(None, Some(10)));
        let mut records = Vec::new();

        let outcome = supervisor
            .run(
                &shell("echo out_time_ms=1000000; echo speed=2.5x; echo progress=end"),
                |r| records.push(r.clone()),
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["out_time_ms", "speed", "progress"]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_tool_failure() {
        let supervisor = Supervisor::new(limits(None, None));

        let outcome = supervisor
            .run(&shell("echo 'Invalid data found' >&2; exit 3"), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Failed { code: Some(3) });
        assert!(outcome.stderr_tail.contains("Invalid data found"));
        assert_eq!(outcome.stderr_excerpt(7), "d found");
    }

    #[tokio::test]
    async fn absolute_timeout_kills_within_one_poll() {
        let supervisor = Supervisor::new(limits(Some(1), None));

        let outcome = supervisor.run(&shell("exec sleep 30"), |_| {}).await.unwrap();

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert!(outcome.elapsed >= Duration::from_secs(1));
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn silent_process_is_stalled_regardless_of_absolute_limit() {
        let supervisor = Supervisor::new(limits(Some(60), Some(1)));

        let outcome = supervisor
            .run(&shell("echo progress=continue; exec sleep 30"), |_| {})
            .await
            .unwrap();

        match outcome.termination {
            Termination::Stalled { idle } => assert!(idle > Duration::from_secs(1)),
            other => panic!("expected stall, got {:?}", other),
        }
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn steady_output_is_not_a_stall() {
        let supervisor = Supervisor::new(limits(None, Some(1)));

        let outcome = supervisor
            .run(
                &shell("for i in 1 2 3 4 5 6 7 8; do echo progress=continue; sleep 0.25; done"),
                |_| {},
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.elapsed >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let supervisor = Supervisor::new(limits(None, None));
        let command = MediaCommand::new("/nonexistent/encoder", "test encoder");

        let result = supervisor.run(&command, |_| {}).await;
        assert!(matches!(result, Err(MediaPrepError::Supervisor(_))));
    }
}
