//! Error types for the submission pipeline.

use thiserror::Error;

use crate::orchestrator::RunId;

/// Result type alias using the volley error type.
pub type Result<T> = std::result::Result<T, VolleyError>;

/// Main error type for the submission pipeline.
#[derive(Error, Debug)]
pub enum VolleyError {
    /// Configuration the pipeline cannot run with (e.g. a zero batch size).
    /// Always reported before any network activity.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The input contained no non-empty lines
    #[error("No valid log lines found")]
    EmptyInput,

    /// The raw input exceeds the configured size limit
    #[error("Input too large: {size} bytes exceeds the limit of {limit} bytes")]
    InputTooLarge { size: usize, limit: usize },

    /// The transformation service rejected or could not process a batch.
    ///
    /// Displays as the bare message so callers can surface it verbatim.
    #[error("{message}")]
    TransformFailure { message: String },

    /// A run is already active on this orchestrator
    #[error("A run is already in progress: {0}")]
    RunAlreadyInProgress(RunId),

    /// The run was cancelled between batches
    #[error("Run cancelled")]
    Cancelled,

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VolleyError {
    /// Shorthand for a [`VolleyError::TransformFailure`].
    pub fn transform(message: impl Into<String>) -> Self {
        VolleyError::TransformFailure {
            message: message.into(),
        }
    }

    /// Whether the error was detected before any batch was submitted.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            VolleyError::InvalidConfiguration(_)
                | VolleyError::EmptyInput
                | VolleyError::InputTooLarge { .. }
                | VolleyError::RunAlreadyInProgress(_)
        )
    }
}
