//! Sequential batch submission of log lines to an ingest pipeline.
//!
//! This crate takes a free-form body of log lines, splits it into non-blank
//! lines, partitions them into fixed-size batches, and pushes the batches one
//! at a time through a remote transformation service (an Elasticsearch ingest
//! pipeline via the simulate API). Results come back per line, in input order,
//! with progress reported after every batch. If a batch fails, the results of
//! the batches before it are kept and handed back alongside the error.
//!
//! ```ignore
//! let client = Arc::new(ElasticsearchClient::new()?);
//! let orchestrator = Orchestrator::new(client, OrchestratorConfig::default())?;
//! let connection = ConnectionContext::new("https://localhost:9200", "elastic", "changeme");
//!
//! let handle = orchestrator.start(RunInput::new(raw_logs, "nginx-access", connection))?;
//! let mut events = Box::pin(handle.events());
//! while let Some(event) = events.next().await {
//!     match event {
//!         RunEvent::Progress(progress) => println!("{progress}"),
//!         RunEvent::Completed { results } => println!("{} lines", results.len()),
//!         RunEvent::Failed { reason, partial } => {
//!             eprintln!("{} ({} lines kept)", reason.to_error_message(), partial.len())
//!         }
//!     }
//! }
//! ```

pub mod batch;
pub mod error;
pub mod lines;
pub mod orchestrator;
pub mod progress;
pub mod results;
pub mod transform;

// Re-export commonly used types
pub use batch::{Batch, DEFAULT_BATCH_SIZE, batch_lines};
pub use error::{Result, VolleyError};
pub use lines::{LogLine, split_lines};
pub use orchestrator::{
    AnyRun, FailureReason, Orchestrator, OrchestratorConfig, RunEvent, RunHandle, RunId, RunInput,
    RunOutcome,
};
pub use progress::ProgressState;
pub use results::{LineRecord, LineResult, ResultSet};
pub use transform::{
    ConnectionContext, ElasticsearchClient, MockOutcome, MockTransformClient, TransformClient,
    TransformClientConfig,
};
