//! Scripted transform client for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use super::{ConnectionContext, TransformClient};
use crate::batch::Batch;
use crate::error::{Result, VolleyError};
use crate::lines::LogLine;
use crate::results::LineResult;

/// Mock transform client for testing.
///
/// Answers each call with the next queued [`MockOutcome`], falling back to
/// [`MockOutcome::Transform`] once the queue is empty. Transformed documents
/// are `{"message": <line>, "pipeline": <id>}`, so results are deterministic.
///
/// # Example
/// ```ignore
/// let mock = MockTransformClient::new();
/// mock.add_outcome(MockOutcome::Transform);
/// mock.add_outcome(MockOutcome::Fail("pipeline not found".to_string()));
/// // first batch succeeds, second fails, later batches succeed again
/// ```
#[derive(Clone, Default)]
pub struct MockTransformClient {
    outcomes: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// What the mock does with one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Every line succeeds.
    Transform,
    /// Lines at these positions within the batch fail; the rest succeed.
    FailLines(Vec<usize>),
    /// The whole call fails with this message.
    Fail(String),
}

enum ScriptedOutcome {
    Immediate(MockOutcome),
    /// Outcome that waits for a trigger signal before completing
    Triggered {
        outcome: MockOutcome,
        trigger: oneshot::Receiver<()>,
    },
}

/// Record of a call made to the mock client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub pipeline_id: String,
    pub url: String,
    pub batch_index: usize,
    pub offset: usize,
    pub lines: Vec<LogLine>,
}

impl MockTransformClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome. Outcomes are used in FIFO order, one per call.
    pub fn add_outcome(&self, outcome: MockOutcome) {
        self.outcomes
            .lock()
            .push_back(ScriptedOutcome::Immediate(outcome));
    }

    /// Queue an outcome that completes only once the returned sender fires
    /// (or is dropped).
    pub fn add_outcome_with_trigger(&self, outcome: MockOutcome) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.outcomes.lock().push_back(ScriptedOutcome::Triggered {
            outcome,
            trigger: rx,
        });
        tx
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn apply(outcome: MockOutcome, batch: &Batch, pipeline_id: &str) -> Result<Vec<LineResult>> {
        let failing = match outcome {
            MockOutcome::Fail(message) => return Err(VolleyError::transform(message)),
            MockOutcome::FailLines(positions) => positions,
            MockOutcome::Transform => Vec::new(),
        };

        Ok(batch
            .lines()
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if failing.contains(&i) {
                    LineResult::failure(line.clone(), format!("mock failure for line {}", batch.offset + i))
                } else {
                    LineResult::success(
                        line.clone(),
                        json!({"message": line.as_str(), "pipeline": pipeline_id}),
                    )
                }
            })
            .collect())
    }
}

#[async_trait]
impl TransformClient for MockTransformClient {
    async fn submit(
        &self,
        batch: &Batch,
        pipeline_id: &str,
        connection: &ConnectionContext,
    ) -> Result<Vec<LineResult>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Decrement even if the call is cancelled mid-await
        let in_flight = self.in_flight.clone();
        let _guard = scopeguard::guard((), move |_| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        self.calls.lock().push(MockCall {
            pipeline_id: pipeline_id.to_string(),
            url: connection.url.clone(),
            batch_index: batch.index,
            offset: batch.offset,
            lines: batch.lines.clone(),
        });

        let scripted = self.outcomes.lock().pop_front();
        let outcome = match scripted {
            None => MockOutcome::Transform,
            Some(ScriptedOutcome::Immediate(outcome)) => outcome,
            Some(ScriptedOutcome::Triggered { outcome, trigger }) => {
                // Proceed whether the trigger fired or was dropped
                let _ = trigger.await;
                outcome
            }
        };

        Self::apply(outcome, batch, pipeline_id)
    }
}
