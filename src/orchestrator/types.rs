//! Run state types using the typestate pattern.
//!
//! Each run progresses through distinct states, enforced at compile time:
//! a `Run<Running>` can only become a `Run<Completed>` or a `Run<Failed>`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::VolleyError;
use crate::progress::ProgressState;
use crate::results::ResultSet;

/// Unique identifier for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        RunId(uuid)
    }
}

impl std::ops::Deref for RunId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Marker trait for valid run states.
pub trait RunState: Send + Sync {}

/// One execution of the orchestrator, from `start` to a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct Run<T: RunState> {
    /// The current state of the run.
    pub state: T,
    /// Immutable facts about the run.
    pub data: RunData,
}

/// Fixed when the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunData {
    pub id: RunId,
    pub pipeline_id: String,
    pub batch_size: usize,
    /// Non-empty lines after splitting
    pub total_lines: usize,
    pub total_batches: usize,
}

// ============================================================================
// Run States
// ============================================================================

/// Batches are being submitted.
///
/// The result accumulator belongs to the run task, not to this record; only
/// the progress is shared.
#[derive(Debug, Clone, Serialize)]
pub struct Running {
    pub started_at: DateTime<Utc>,
    pub batches_completed: usize,
    pub progress: ProgressState,
}

impl RunState for Running {}

/// Every batch was processed.
#[derive(Debug, Clone, Serialize)]
pub struct Completed {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: ResultSet,
}

impl RunState for Completed {}

/// The run stopped before processing every batch.
#[derive(Debug, Clone, Serialize)]
pub struct Failed {
    pub reason: FailureReason,
    pub started_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    /// Results of the batches that finished before the failure
    pub partial: ResultSet,
    pub progress: ProgressState,
}

impl RunState for Failed {}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum FailureReason {
    /// Splitting the input produced no lines; no batch was submitted.
    EmptyInput,

    /// The transform client failed a batch outright.
    TransformFailure { batch_index: usize, message: String },

    /// Cancelled between batches by the caller or by shutdown.
    Cancelled,

    /// The run task ended without reaching a terminal state (panic or abort).
    TaskTerminated,
}

impl FailureReason {
    /// Returns a human-readable error message for this failure reason.
    pub fn to_error_message(&self) -> String {
        match self {
            FailureReason::EmptyInput => VolleyError::EmptyInput.to_string(),
            FailureReason::TransformFailure { message, .. } => message.clone(),
            FailureReason::Cancelled => VolleyError::Cancelled.to_string(),
            FailureReason::TaskTerminated => "Run task terminated unexpectedly".to_string(),
        }
    }

    /// The error a caller sees for this failure.
    pub fn to_error(&self) -> VolleyError {
        match self {
            FailureReason::EmptyInput => VolleyError::EmptyInput,
            FailureReason::TransformFailure { message, .. } => {
                VolleyError::transform(message.clone())
            }
            FailureReason::Cancelled => VolleyError::Cancelled,
            FailureReason::TaskTerminated => {
                VolleyError::Other(anyhow::anyhow!(self.to_error_message()))
            }
        }
    }
}

// ============================================================================
// Unified Run Representation
// ============================================================================

/// The single run-state value an orchestrator owns.
///
/// Replaces independent loading/error/progress flags, so combinations like
/// "running but also failed" can't be represented.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "status", content = "run", rename_all = "snake_case")]
pub enum AnyRun {
    /// No run has been started yet.
    #[default]
    Idle,
    Running(Run<Running>),
    Completed(Run<Completed>),
    Failed(Run<Failed>),
}

impl AnyRun {
    /// Get the run ID, if a run has been started.
    pub fn id(&self) -> Option<RunId> {
        match self {
            AnyRun::Idle => None,
            AnyRun::Running(r) => Some(r.data.id),
            AnyRun::Completed(r) => Some(r.data.id),
            AnyRun::Failed(r) => Some(r.data.id),
        }
    }

    /// Get the variant name of the current state.
    pub fn variant(&self) -> &'static str {
        match self {
            AnyRun::Idle => "Idle",
            AnyRun::Running(_) => "Running",
            AnyRun::Completed(_) => "Completed",
            AnyRun::Failed(_) => "Failed",
        }
    }

    pub fn data(&self) -> Option<&RunData> {
        match self {
            AnyRun::Idle => None,
            AnyRun::Running(r) => Some(&r.data),
            AnyRun::Completed(r) => Some(&r.data),
            AnyRun::Failed(r) => Some(&r.data),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, AnyRun::Running(_))
    }

    /// Check if the last run reached a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnyRun::Completed(_) | AnyRun::Failed(_))
    }

    /// Current progress, if a run has been started.
    pub fn progress(&self) -> Option<ProgressState> {
        match self {
            AnyRun::Idle => None,
            AnyRun::Running(r) => Some(r.state.progress),
            AnyRun::Completed(r) => Some(ProgressState::new(
                r.state.results.len(),
                r.data.total_lines,
            )),
            AnyRun::Failed(r) => Some(r.state.progress),
        }
    }

    /// Results gathered by the last finished run.
    pub fn results(&self) -> Option<&ResultSet> {
        match self {
            AnyRun::Completed(r) => Some(&r.state.results),
            AnyRun::Failed(r) => Some(&r.state.partial),
            AnyRun::Idle | AnyRun::Running(_) => None,
        }
    }
}

// Conversion traits for going from typed Run to AnyRun

impl From<Run<Running>> for AnyRun {
    fn from(r: Run<Running>) -> Self {
        AnyRun::Running(r)
    }
}

impl From<Run<Completed>> for AnyRun {
    fn from(r: Run<Completed>) -> Self {
        AnyRun::Completed(r)
    }
}

impl From<Run<Failed>> for AnyRun {
    fn from(r: Run<Failed>) -> Self {
        AnyRun::Failed(r)
    }
}
