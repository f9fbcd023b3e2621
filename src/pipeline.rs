/// The acquisition loop: chunks, windows, and the fetch-retry state machine.
///
/// Everything runs on one thread. Per window:
///
///   Attempting ──ok──────────────▶ Success ─▶ normalize ─▶ sink
///       │ quota (egress on)
///       ├───────────▶ Rotating ──rotated──▶ Attempting (attempts reset)
///       │                 ├─rotation keeps failing─▶ RotationExhausted
///       │                 └─controller rejects secret─▶ Backoff (egress off for the run)
///       │ transient / quota (egress off)
///       ├───────────▶ Backoff ──n ≤ max──▶ sleep n·step ─▶ Attempting
///       │                 └─n > max──▶ Abandoned
///       └─other──────▶ Abandoned
///
/// A window that fails in any way is logged and skipped; the run goes on.
/// Only an exhausted rotation under the `abort` policy stops the run.
///
/// Every wait goes through the `Sleeper` seam so tests can observe the
/// schedule without actually sleeping.

use crate::checkpoint::Checkpoint;
use crate::config::{ExhaustedPolicy, PacingConfig, RetryConfig};
use crate::egress::{EgressError, EgressRotator};
use crate::grid::chunk_points;
use crate::ingest::archive::{ArchiveSource, FailureClass, FetchError, PointSeries, QuotaScope};
use crate::model::{EgressNode, GridPoint};
use crate::normalize::normalize_window;
use crate::sink::RecordSink;
use crate::windows::{chunk_windows, FetchWindow, YearRange};
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Blocking wait. The only suspension points of the loop go through here.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub minutely_cooldown: Duration,
    pub stabilization: Duration,
    pub max_rotation_failures: u32,
    pub rotation_retry: Duration,
    pub verify_after_rotate: bool,
    pub on_exhausted: ExhaustedPolicy,
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry waits `n * backoff_step`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            max_attempts: c.max_attempts,
            backoff_step: Duration::from_secs(c.backoff_step_secs),
            minutely_cooldown: Duration::from_secs(c.minutely_cooldown_secs),
            stabilization: Duration::from_secs(c.stabilization_secs),
            max_rotation_failures: c.max_rotation_failures.max(1),
            rotation_retry: Duration::from_secs(c.rotation_retry_secs),
            verify_after_rotate: c.verify_after_rotate,
            on_exhausted: c.on_rotation_exhausted,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub window_pause: Duration,
    pub chunk_pause: Duration,
}

impl From<&PacingConfig> for Pacing {
    fn from(c: &PacingConfig) -> Self {
        Self {
            window_pause: Duration::from_secs(c.window_pause_secs),
            chunk_pause: Duration::from_secs(c.chunk_pause_secs),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&PacingConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Window state
// ---------------------------------------------------------------------------

/// Where a window's fetch currently stands.
#[derive(Debug)]
enum FetchState {
    Attempting,
    Backoff,
    Rotating,
    Success(Vec<PointSeries>),
    Abandoned(String),
}

/// Per-window retry bookkeeping; dropped when the window finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Counted failures since the last successful rotation.
    pub attempt: u32,
    pub max_attempts: u32,
    pub classification: Option<FailureClass>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            classification: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Stored { records: usize },
    Abandoned { reason: String },
    RotationExhausted { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbandonedWindow {
    pub chunk_index: usize,
    pub year: i32,
    pub reason: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub chunks: usize,
    pub windows_attempted: usize,
    pub windows_stored: usize,
    /// Already stored according to the resume state.
    pub windows_skipped: usize,
    pub abandoned: Vec<AbandonedWindow>,
    /// Rows handed to the sink (conflicting rows included).
    pub records_written: usize,
    pub rotations: usize,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("egress rotation exhausted at chunk {chunk_index}, year {year}: {reason}")]
    RotationExhausted {
        chunk_index: usize,
        year: i32,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<A, E, K, Z> {
    archive: A,
    egress: E,
    sink: K,
    sleeper: Z,
    policy: RetryPolicy,
    pacing: Pacing,
    checkpoint: Option<Checkpoint>,
    rotations: usize,
}

impl<A, E, K, Z> Pipeline<A, E, K, Z>
where
    A: ArchiveSource,
    E: EgressRotator,
    K: RecordSink,
    Z: Sleeper,
{
    pub fn new(archive: A, egress: E, sink: K, sleeper: Z, policy: RetryPolicy, pacing: Pacing) -> Self {
        Self {
            archive,
            egress,
            sink,
            sleeper,
            policy,
            pacing,
            checkpoint: None,
            rotations: 0,
        }
    }

    /// Skips windows recorded in `checkpoint` and records newly stored ones.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    pub fn egress(&self) -> &E {
        &self.egress
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sleeper(&self) -> &Z {
        &self.sleeper
    }

    /// Fetches every (chunk, year) window of `points` over `range`.
    pub fn run(
        &mut self,
        points: &[GridPoint],
        chunk_size: NonZeroUsize,
        range: YearRange,
    ) -> Result<RunReport, PipelineError> {
        let chunks = chunk_points(points, chunk_size);
        let rotations_before = self.rotations;
        let mut report = RunReport {
            chunks: chunks.len(),
            ..RunReport::default()
        };

        info!(
            points = points.len(),
            chunks = chunks.len(),
            start_year = range.start,
            end_year = range.end,
            "starting grid ingest"
        );

        let mut chunk_pause_due = false;
        for chunk in &chunks {
            if chunk_pause_due {
                self.sleeper.sleep(self.pacing.chunk_pause);
                chunk_pause_due = false;
            }
            info!(chunk = chunk.index, points = chunk.len(), "chunk {}/{}", chunk.index + 1, chunks.len());

            let mut window_pause_due = false;
            for window in chunk_windows(*chunk, range) {
                if self.is_checkpointed(&window) {
                    debug!(chunk = window.chunk_index, year = window.year, "already stored, skipping");
                    report.windows_skipped += 1;
                    continue;
                }
                if window_pause_due {
                    self.sleeper.sleep(self.pacing.window_pause);
                }
                window_pause_due = true;
                chunk_pause_due = true;
                report.windows_attempted += 1;

                match self.process_window(&window) {
                    WindowOutcome::Stored { records } => {
                        report.windows_stored += 1;
                        report.records_written += records;
                        self.record_checkpoint(&window);
                    }
                    WindowOutcome::Abandoned { reason } => {
                        error!(chunk = window.chunk_index, year = window.year, %reason, "window abandoned");
                        report.abandoned.push(AbandonedWindow {
                            chunk_index: window.chunk_index,
                            year: window.year,
                            reason,
                        });
                    }
                    WindowOutcome::RotationExhausted { reason } => {
                        error!(chunk = window.chunk_index, year = window.year, %reason, "egress rotation exhausted");
                        if self.policy.on_exhausted == ExhaustedPolicy::Abort {
                            return Err(PipelineError::RotationExhausted {
                                chunk_index: window.chunk_index,
                                year: window.year,
                                reason,
                            });
                        }
                        report.abandoned.push(AbandonedWindow {
                            chunk_index: window.chunk_index,
                            year: window.year,
                            reason,
                        });
                    }
                }
            }
        }

        report.rotations = self.rotations - rotations_before;
        info!(
            stored = report.windows_stored,
            abandoned = report.abandoned.len(),
            skipped = report.windows_skipped,
            records = report.records_written,
            rotations = report.rotations,
            "grid ingest finished"
        );
        Ok(report)
    }

    /// Fetch, normalize and store one window. Nothing is written unless the
    /// whole window normalizes cleanly.
    pub fn process_window(&mut self, window: &FetchWindow<'_>) -> WindowOutcome {
        info!(chunk = window.chunk_index, year = window.year, points = window.points.len(), "fetching window");

        let series = match self.fetch_with_retry(window) {
            Ok(series) => series,
            Err(outcome) => return outcome,
        };
        for s in &series {
            debug!(latitude = s.latitude, longitude = s.longitude, "provider cell");
        }

        let records = match normalize_window(window.points, &series) {
            Ok(records) => records,
            Err(e) => return WindowOutcome::Abandoned { reason: e.to_string() },
        };

        match self.sink.upsert_batch(&records) {
            Ok(count) => {
                info!(chunk = window.chunk_index, year = window.year, records = count, "window stored");
                WindowOutcome::Stored { records: count }
            }
            Err(e) => WindowOutcome::Abandoned { reason: e.to_string() },
        }
    }

    fn fetch_with_retry(&mut self, window: &FetchWindow<'_>) -> Result<Vec<PointSeries>, WindowOutcome> {
        let mut retry = RetryState::new(self.policy.max_attempts);
        let mut last_error: Option<FetchError> = None;
        let mut state = FetchState::Attempting;

        loop {
            state = match state {
                FetchState::Attempting => match self.archive.fetch(window) {
                    Ok(series) => FetchState::Success(series),
                    Err(e) => {
                        let class = e.class();
                        retry.classification = Some(class);
                        let next = match class {
                            FailureClass::Quota(scope) => {
                                warn!(chunk = window.chunk_index, year = window.year, %scope, error = %e, "rate limit hit");
                                if self.egress.is_enabled() {
                                    FetchState::Rotating
                                } else {
                                    FetchState::Backoff
                                }
                            }
                            FailureClass::Transient => FetchState::Backoff,
                            FailureClass::Fatal => FetchState::Abandoned(e.to_string()),
                        };
                        last_error = Some(e);
                        next
                    }
                },

                FetchState::Backoff => {
                    retry.attempt += 1;
                    let reason = last_error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                    if retry.attempt > retry.max_attempts {
                        FetchState::Abandoned(format!("gave up after {} retries: {}", retry.max_attempts, reason))
                    } else {
                        let delay = self.policy.backoff_delay(retry.attempt);
                        warn!(
                            chunk = window.chunk_index,
                            year = window.year,
                            attempt = retry.attempt,
                            max_attempts = retry.max_attempts,
                            delay_secs = delay.as_secs(),
                            error = %reason,
                            "request failed, backing off"
                        );
                        self.sleeper.sleep(delay);
                        FetchState::Attempting
                    }
                }

                FetchState::Rotating => {
                    if retry.classification == Some(FailureClass::Quota(QuotaScope::Minutely)) {
                        info!(secs = self.policy.minutely_cooldown.as_secs(), "cooling down before rotation");
                        self.sleeper.sleep(self.policy.minutely_cooldown);
                    }

                    match self.rotate_with_retry() {
                        Ok(node) => {
                            self.rotations += 1;
                            self.sleeper.sleep(self.policy.stabilization);
                            if self.policy.verify_after_rotate {
                                match self.egress.verify(&mut self.sleeper) {
                                    Some(identity) => debug!(node = %node, %identity, "egress identity"),
                                    None => warn!(node = %node, "could not verify egress identity, continuing"),
                                }
                            }
                            retry.attempt = 0;
                            FetchState::Attempting
                        }
                        Err(e @ (EgressError::ControllerUnauthorized(_) | EgressError::Disabled)) => {
                            warn!(chunk = window.chunk_index, year = window.year, error = %e, "egress unusable, backing off instead");
                            self.egress.disable();
                            FetchState::Backoff
                        }
                        Err(e) => {
                            return Err(WindowOutcome::RotationExhausted { reason: e.to_string() });
                        }
                    }
                }

                FetchState::Success(series) => return Ok(series),

                FetchState::Abandoned(reason) => return Err(WindowOutcome::Abandoned { reason }),
            };
        }
    }

    /// Rotates, retrying failed rotations up to `max_rotation_failures` times.
    /// Rejected credentials are not retried.
    fn rotate_with_retry(&mut self) -> Result<EgressNode, EgressError> {
        let mut failures = 0;
        loop {
            match self.egress.rotate() {
                Ok(node) => return Ok(node),
                Err(e @ (EgressError::ControllerUnauthorized(_) | EgressError::Disabled)) => return Err(e),
                Err(e) => {
                    failures += 1;
                    warn!(failures, max = self.policy.max_rotation_failures, error = %e, "egress rotation failed");
                    if failures >= self.policy.max_rotation_failures {
                        return Err(e);
                    }
                    self.sleeper.sleep(self.policy.rotation_retry);
                }
            }
        }
    }

    fn is_checkpointed(&self, window: &FetchWindow<'_>) -> bool {
        self.checkpoint
            .as_ref()
            .is_some_and(|cp| cp.is_complete(window.chunk_index, window.year))
    }

    fn record_checkpoint(&mut self, window: &FetchWindow<'_>) {
        if let Some(cp) = self.checkpoint.as_mut() {
            if let Err(e) = cp.mark_complete(window.chunk_index, window.year) {
                warn!(error = %e, "failed to save ingest state");
            }
        }
    }
}
