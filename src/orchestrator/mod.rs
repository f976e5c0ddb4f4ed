//! Orchestrator that drives a run: split, batch, submit sequentially, accumulate.
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::stream::{self, Stream};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::batch::{DEFAULT_BATCH_SIZE, batch_lines};
use crate::error::{Result, VolleyError};
use crate::lines::split_lines;
use crate::progress::ProgressState;
use crate::results::{LineResult, ResultSet};
use crate::transform::{ConnectionContext, TransformClient};

pub mod transitions;
pub mod types;

use transitions::RunSlot;
pub use types::{
    AnyRun, Completed, Failed, FailureReason, Run, RunData, RunId, RunState, Running,
};

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Lines per batch when a run doesn't ask for a specific size
    pub batch_size: usize,

    /// Largest raw input accepted, in bytes. `None` disables the check.
    pub max_input_bytes: Option<usize>,

    /// Interval for logging the active run's progress in milliseconds.
    /// Set to None to disable periodic status logging
    pub status_log_interval_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_input_bytes: Some(10 * 1024 * 1024),
            status_log_interval_ms: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(VolleyError::InvalidConfiguration(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_input_bytes == Some(0) {
            return Err(VolleyError::InvalidConfiguration(
                "max_input_bytes must be greater than zero".to_string(),
            ));
        }
        if self.status_log_interval_ms == Some(0) {
            return Err(VolleyError::InvalidConfiguration(
                "status_log_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything one run needs from the caller.
#[derive(Debug, Clone)]
pub struct RunInput {
    /// Uploaded file content or pasted text
    pub raw_input: String,
    pub pipeline_id: String,
    pub connection: ConnectionContext,
    /// Lines per batch; `None` uses the orchestrator's configured size
    pub batch_size: Option<usize>,
}

impl RunInput {
    pub fn new(
        raw_input: impl Into<String>,
        pipeline_id: impl Into<String>,
        connection: ConnectionContext,
    ) -> Self {
        Self {
            raw_input: raw_input.into(),
            pipeline_id: pipeline_id.into(),
            connection,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Events emitted by a run, in order.
///
/// Zero or more `Progress` events (one per finished batch), then exactly one
/// of `Completed` or `Failed`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Progress(ProgressState),
    Completed {
        results: ResultSet,
    },
    Failed {
        reason: FailureReason,
        partial: ResultSet,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Progress(_))
    }
}

/// Terminal record of a run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Run<Completed>),
    Failed(Run<Failed>),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn data(&self) -> &RunData {
        match self {
            RunOutcome::Completed(r) => &r.data,
            RunOutcome::Failed(r) => &r.data,
        }
    }

    /// All results on completion, the finished prefix on failure.
    pub fn results(&self) -> &ResultSet {
        match self {
            RunOutcome::Completed(r) => &r.state.results,
            RunOutcome::Failed(r) => &r.state.partial,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            RunOutcome::Completed(_) => None,
            RunOutcome::Failed(r) => Some(&r.state.reason),
        }
    }

    pub fn progress(&self) -> ProgressState {
        match self {
            RunOutcome::Completed(r) => {
                ProgressState::new(r.state.results.len(), r.data.total_lines)
            }
            RunOutcome::Failed(r) => r.state.progress,
        }
    }

    /// Full results, or the run's error. Discards any partial results.
    pub fn into_result(self) -> Result<ResultSet> {
        match self {
            RunOutcome::Completed(r) => Ok(r.state.results),
            RunOutcome::Failed(r) => Err(r.state.reason.to_error()),
        }
    }
}

/// Caller's side of a started run.
///
/// Dropping the handle cancels the run before its next batch; use
/// [`RunHandle::detach`] to let it finish unobserved instead.
pub struct RunHandle {
    run_id: RunId,
    total_lines: usize,
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancellation_token: CancellationToken,
    cancel_on_drop: DropGuard,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.run_id
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    /// Ask the run to stop before its next batch.
    ///
    /// A batch already submitted is allowed to finish and its results are kept.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Next event, or `None` once the terminal event has been received.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// The run's events as a stream, ending after the terminal event.
    ///
    /// Dropping the stream before it ends cancels the run, like dropping the
    /// handle.
    pub fn events(self) -> impl Stream<Item = RunEvent> + Send {
        let RunHandle {
            events,
            cancel_on_drop,
            ..
        } = self;
        stream::unfold((events, cancel_on_drop), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        })
    }

    /// Wait for the run to finish.
    ///
    /// Events not yet consumed are discarded.
    pub async fn wait(self) -> Result<RunOutcome> {
        let RunHandle {
            task,
            cancel_on_drop: _cancel_on_drop,
            ..
        } = self;
        task.await
            .map_err(|e| VolleyError::Other(anyhow::anyhow!("Run task failed: {}", e)))
    }

    /// Let the run continue without a handle.
    ///
    /// Its progress stays visible through `Orchestrator::state`, and the
    /// returned task resolves to the outcome.
    pub fn detach(self) -> JoinHandle<RunOutcome> {
        let RunHandle {
            task,
            cancel_on_drop,
            ..
        } = self;
        cancel_on_drop.disarm();
        task
    }
}

/// Orchestrator that runs one batch submission at a time.
///
/// Each run splits its input, batches the lines, and submits the batches to
/// the transform client strictly one after another, accumulating results in
/// input order. Starting a run while another is active is rejected.
pub struct Orchestrator<C>
where
    C: TransformClient,
{
    client: Arc<C>,
    config: OrchestratorConfig,
    slot: RunSlot,
    shutdown_token: CancellationToken,
}

impl<C> Orchestrator<C>
where
    C: TransformClient + 'static,
{
    /// Create a new orchestrator.
    pub fn new(client: Arc<C>, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            slot: RunSlot::default(),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Tie runs to a parent token; cancelling it cancels active runs between
    /// batches.
    pub fn with_shutdown(mut self, shutdown_token: CancellationToken) -> Self {
        self.shutdown_token = shutdown_token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot of the current (or last) run's state.
    pub fn state(&self) -> AnyRun {
        self.slot.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_running()
    }

    /// Start a run.
    ///
    /// Configuration, input size, and concurrent-run errors are returned
    /// before anything is recorded. Input with no non-empty lines is recorded
    /// as a run that failed with [`FailureReason::EmptyInput`] and returned as
    /// [`VolleyError::EmptyInput`]; the transform client is never called.
    ///
    /// Must be called from within a Tokio runtime; the run executes on a
    /// spawned task.
    #[tracing::instrument(skip(self, input), fields(pipeline = %input.pipeline_id))]
    pub fn start(&self, input: RunInput) -> Result<RunHandle> {
        let batch_size = input.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(VolleyError::InvalidConfiguration(
                "batch size must be greater than zero".to_string(),
            ));
        }
        if input.pipeline_id.is_empty() {
            return Err(VolleyError::InvalidConfiguration(
                "pipeline id must not be empty".to_string(),
            ));
        }
        if let Some(limit) = self.config.max_input_bytes
            && input.raw_input.len() > limit
        {
            return Err(VolleyError::InputTooLarge {
                size: input.raw_input.len(),
                limit,
            });
        }

        let lines = split_lines(&input.raw_input);
        let total_lines = lines.len();
        let batches = batch_lines(lines, batch_size)?;

        let run = Run::begin(
            RunData {
                id: RunId::new(),
                pipeline_id: input.pipeline_id.clone(),
                batch_size,
                total_lines,
                total_batches: batches.len(),
            },
            &self.slot,
        )?;
        let run_id = run.data.id;

        if total_lines == 0 {
            tracing::warn!(run_id = %run_id, "No valid log lines found, run failed before submission");
            counter!("volley_runs_total", "outcome" => "empty_input").increment(1);
            run.fail(FailureReason::EmptyInput, ResultSet::new(), &self.slot);
            return Err(VolleyError::EmptyInput);
        }

        tracing::info!(
            run_id = %run_id,
            total_lines,
            total_batches = batches.len(),
            batch_size,
            "Run started"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancellation_token = self.shutdown_token.child_token();

        let task = tokio::spawn(drive_run(
            self.client.clone(),
            run,
            batches,
            input.connection,
            self.slot.clone(),
            cancellation_token.clone(),
            events_tx,
            self.config.status_log_interval_ms,
        ));

        Ok(RunHandle {
            run_id,
            total_lines,
            events: events_rx,
            cancel_on_drop: cancellation_token.clone().drop_guard(),
            cancellation_token,
            task,
        })
    }

    /// Start a run and wait for it, ignoring progress events.
    pub async fn run(&self, input: RunInput) -> Result<RunOutcome> {
        self.start(input)?.wait().await
    }
}

/// Body of a run task: submit every batch in order, stopping at the first
/// failure or at a cancellation observed between batches.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(run_id = %run.data.id, pipeline = %run.data.pipeline_id))]
async fn drive_run<C: TransformClient>(
    client: Arc<C>,
    run: Run<Running>,
    batches: Vec<crate::batch::Batch>,
    connection: ConnectionContext,
    slot: RunSlot,
    cancellation_token: CancellationToken,
    events: mpsc::UnboundedSender<RunEvent>,
    status_log_interval_ms: Option<u64>,
) -> RunOutcome {
    let run_id = run.data.id;
    let pipeline_id = run.data.pipeline_id.clone();

    // If this task is aborted before a terminal transition, don't leave the
    // slot stuck in Running
    let abandon_slot = slot.clone();
    let _abandon_guard = scopeguard::guard((), move |_| abandon_slot.abandon(run_id));

    // Stops the status logger when the run ends
    let _status_guard = status_log_interval_ms
        .map(|interval_ms| spawn_status_logger(slot.clone(), run_id, interval_ms).0);

    let mut run = run;
    let mut results = ResultSet::with_capacity(run.data.total_lines);

    for batch in batches {
        if cancellation_token.is_cancelled() {
            tracing::warn!(
                completed = results.len(),
                total = run.data.total_lines,
                "Run cancelled between batches"
            );
            counter!("volley_runs_total", "outcome" => "cancelled").increment(1);
            let failed = run.fail(FailureReason::Cancelled, results, &slot);
            return finish_failed(failed, &events);
        }

        tracing::debug!(
            batch_index = batch.index,
            offset = batch.offset,
            lines = batch.len(),
            "Submitting batch"
        );

        let started = Instant::now();
        let submitted = AssertUnwindSafe(client.submit(&batch, &pipeline_id, &connection))
            .catch_unwind()
            .await;
        histogram!("volley_batch_duration_seconds", "pipeline" => pipeline_id.clone())
            .record(started.elapsed().as_secs_f64());

        // A panicking client ends the run like any other failure, keeping the
        // batches that already finished
        let submitted = match submitted {
            Ok(submitted) => {
                submitted.and_then(|batch_results| check_batch_results(&batch, batch_results))
            }
            Err(panic) => {
                tracing::error!(
                    batch_index = batch.index,
                    panic = %panic_message(panic.as_ref()),
                    completed = results.len(),
                    "Transform client panicked, stopping run"
                );
                counter!("volley_runs_total", "outcome" => "terminated").increment(1);
                let failed = run.fail(FailureReason::TaskTerminated, results, &slot);
                return finish_failed(failed, &events);
            }
        };

        match submitted {
            Ok(batch_results) => {
                let succeeded = batch_results.iter().filter(|r| r.is_success()).count();
                counter!("volley_batches_total", "pipeline" => pipeline_id.clone(), "status" => "completed")
                    .increment(1);
                counter!("volley_lines_total", "pipeline" => pipeline_id.clone(), "outcome" => "success")
                    .increment(succeeded as u64);
                counter!("volley_lines_total", "pipeline" => pipeline_id.clone(), "outcome" => "failure")
                    .increment((batch_results.len() - succeeded) as u64);

                results.extend_batch(batch_results);
                run = run.advance(batch.len(), &slot);

                tracing::info!(
                    batch_index = batch.index,
                    progress = %run.state.progress,
                    "Batch completed"
                );
                // Ignore send errors (caller dropped the receiver)
                let _ = events.send(RunEvent::Progress(run.state.progress));
            }
            Err(e) => {
                let message = match e {
                    VolleyError::TransformFailure { message } => message,
                    other => other.to_string(),
                };
                tracing::error!(
                    batch_index = batch.index,
                    error = %message,
                    completed = results.len(),
                    "Batch failed, stopping run"
                );
                counter!("volley_batches_total", "pipeline" => pipeline_id.clone(), "status" => "failed")
                    .increment(1);
                counter!("volley_runs_total", "outcome" => "failed").increment(1);

                let failed = run.fail(
                    FailureReason::TransformFailure {
                        batch_index: batch.index,
                        message,
                    },
                    results,
                    &slot,
                );
                return finish_failed(failed, &events);
            }
        }
    }

    let completed = run.complete(results, &slot);
    tracing::info!(
        lines = completed.state.results.len(),
        failed_lines = completed.state.results.failed(),
        "Run completed"
    );
    counter!("volley_runs_total", "outcome" => "completed").increment(1);
    let _ = events.send(RunEvent::Completed {
        results: completed.state.results.clone(),
    });
    RunOutcome::Completed(completed)
}

fn finish_failed(failed: Run<Failed>, events: &mpsc::UnboundedSender<RunEvent>) -> RunOutcome {
    let _ = events.send(RunEvent::Failed {
        reason: failed.state.reason.clone(),
        partial: failed.state.partial.clone(),
    });
    RunOutcome::Failed(failed)
}

/// Hold a client to its contract: one result per line, in order.
fn check_batch_results(
    batch: &crate::batch::Batch,
    batch_results: Vec<LineResult>,
) -> Result<Vec<LineResult>> {
    if batch_results.len() != batch.len() {
        return Err(VolleyError::transform(format!(
            "Transform client returned {} results for a batch of {} lines",
            batch_results.len(),
            batch.len()
        )));
    }
    if let Some(position) = batch
        .lines()
        .iter()
        .zip(&batch_results)
        .position(|(line, result)| result.original() != line)
    {
        return Err(VolleyError::transform(format!(
            "Transform client returned results out of order at line {}",
            batch.offset + position
        )));
    }
    Ok(batch_results)
}

fn panic_message<'a>(panic: &'a (dyn Any + Send + 'static)) -> &'a str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Log the active run's progress every `interval_ms` until the returned guard
/// is dropped.
fn spawn_status_logger(
    slot: RunSlot,
    run_id: RunId,
    interval_ms: u64,
) -> (DropGuard, JoinHandle<()>) {
    let token = CancellationToken::new();
    let stop = token.clone().drop_guard();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(progress) = slot.snapshot().progress() {
                        tracing::debug!(run_id = %run_id, progress = %progress, "Run status");
                    }
                }
                _ = token.cancelled() => break,
            }
        }
        tracing::trace!(run_id = %run_id, "Status logger stopped");
    });
    (stop, task)
}
