//! State transitions for runs.
//!
//! ```text
//! Idle ──begin()──> Run<Running> ──advance()──> Run<Running>
//!                        │
//!                        ├──complete()──> Run<Completed>
//!                        └──fail()──────> Run<Failed>   (EmptyInput, TransformFailure,
//!                                                        Cancelled, TaskTerminated)
//! ```
//!
//! Every transition publishes the new record to the orchestrator's [`RunSlot`],
//! which is what `Orchestrator::state` reads.

use std::sync::Arc;

use parking_lot::Mutex;

use super::types::{
    AnyRun, Completed, Failed, FailureReason, Run, RunData, RunId, RunState, Running,
};
use crate::error::{Result, VolleyError};
use crate::progress::ProgressState;
use crate::results::ResultSet;

/// Shared holder of an orchestrator's current run state.
///
/// At most one run is `Running` in a slot at a time.
#[derive(Clone, Default)]
pub(crate) struct RunSlot(Arc<Mutex<AnyRun>>);

impl RunSlot {
    pub(crate) fn snapshot(&self) -> AnyRun {
        self.0.lock().clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.0.lock().is_running()
    }

    fn publish<T: RunState + Clone>(&self, run: &Run<T>)
    where
        AnyRun: From<Run<T>>,
    {
        *self.0.lock() = AnyRun::from(run.clone());
    }

    /// Mark run `id` as terminated if it is still shown as running.
    ///
    /// Used when a run task is aborted before reaching a terminal state.
    /// Results held by the task are lost; the record keeps the last published
    /// progress so callers can see how far the run got.
    pub(crate) fn abandon(&self, id: RunId) {
        let mut slot = self.0.lock();
        if let AnyRun::Running(active) = &*slot
            && active.data.id == id
        {
            tracing::error!(run_id = %id, "Run task ended without reaching a terminal state");
            let failed = Run {
                data: active.data.clone(),
                state: Failed {
                    reason: FailureReason::TaskTerminated,
                    started_at: active.state.started_at,
                    failed_at: chrono::Utc::now(),
                    partial: ResultSet::new(),
                    progress: active.state.progress,
                },
            };
            *slot = AnyRun::Failed(failed);
        }
    }
}

impl Run<Running> {
    /// Start a run in `slot`.
    ///
    /// Fails with [`VolleyError::RunAlreadyInProgress`] if the slot already
    /// holds a running run; the slot is left untouched in that case.
    pub(crate) fn begin(data: RunData, slot: &RunSlot) -> Result<Run<Running>> {
        let run = Run {
            state: Running {
                started_at: chrono::Utc::now(),
                batches_completed: 0,
                progress: ProgressState::initial(data.total_lines),
            },
            data,
        };

        let mut current = slot.0.lock();
        if let AnyRun::Running(active) = &*current {
            return Err(VolleyError::RunAlreadyInProgress(active.data.id));
        }
        *current = AnyRun::Running(run.clone());
        Ok(run)
    }

    /// Record that another batch of `lines` lines finished.
    pub(crate) fn advance(self, lines: usize, slot: &RunSlot) -> Run<Running> {
        let run = Run {
            data: self.data,
            state: Running {
                started_at: self.state.started_at,
                batches_completed: self.state.batches_completed + 1,
                progress: self.state.progress.advance(lines),
            },
        };
        slot.publish(&run);
        run
    }

    pub(crate) fn complete(self, results: ResultSet, slot: &RunSlot) -> Run<Completed> {
        let run = Run {
            data: self.data,
            state: Completed {
                started_at: self.state.started_at,
                completed_at: chrono::Utc::now(),
                results,
            },
        };
        slot.publish(&run);
        run
    }

    /// End the run early, keeping the results of the batches that finished.
    pub(crate) fn fail(
        self,
        reason: FailureReason,
        partial: ResultSet,
        slot: &RunSlot,
    ) -> Run<Failed> {
        let run = Run {
            data: self.data,
            state: Failed {
                reason,
                started_at: self.state.started_at,
                failed_at: chrono::Utc::now(),
                partial,
                progress: self.state.progress,
            },
        };
        slot.publish(&run);
        run
    }
}
