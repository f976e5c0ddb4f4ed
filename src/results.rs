//! Per-line results and the ordered result set of a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::lines::LogLine;

/// Outcome of pushing one log line through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LineResult {
    /// The pipeline transformed the line into a document.
    Success { original: LogLine, transformed: Value },
    /// The pipeline ran but rejected this particular line.
    Failure {
        original: LogLine,
        error_message: String,
    },
}

impl LineResult {
    pub fn success(original: LogLine, transformed: Value) -> Self {
        LineResult::Success {
            original,
            transformed,
        }
    }

    pub fn failure(original: LogLine, error_message: impl Into<String>) -> Self {
        LineResult::Failure {
            original,
            error_message: error_message.into(),
        }
    }

    /// The input line this result belongs to.
    pub fn original(&self) -> &LogLine {
        match self {
            LineResult::Success { original, .. } => original,
            LineResult::Failure { original, .. } => original,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LineResult::Success { .. })
    }

    pub fn transformed(&self) -> Option<&Value> {
        match self {
            LineResult::Success { transformed, .. } => Some(transformed),
            LineResult::Failure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            LineResult::Success { .. } => None,
            LineResult::Failure { error_message, .. } => Some(error_message),
        }
    }
}

/// Ordered results of a run, one per completed line.
///
/// Only ever grows at the end, a whole batch at a time, so at any point it is a
/// prefix of the run's full result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet(Vec<LineResult>);

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        ResultSet(Vec::with_capacity(capacity))
    }

    /// Append one batch's results.
    pub(crate) fn extend_batch(&mut self, batch_results: Vec<LineResult>) {
        self.0.extend(batch_results);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LineResult> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LineResult> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[LineResult] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<LineResult> {
        self.0
    }

    /// Number of lines the pipeline transformed.
    pub fn succeeded(&self) -> usize {
        self.0.iter().filter(|r| r.is_success()).count()
    }

    /// Number of lines the pipeline rejected.
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn to_records(&self) -> Vec<LineRecord> {
        self.0.iter().map(LineRecord::from).collect()
    }

    /// One value per line: the transformed document, or the error message as a
    /// JSON string for lines the pipeline rejected.
    pub fn transformed_documents(&self) -> Vec<Value> {
        self.0
            .iter()
            .map(|result| match result {
                LineResult::Success { transformed, .. } => transformed.clone(),
                LineResult::Failure { error_message, .. } => Value::String(error_message.clone()),
            })
            .collect()
    }

    /// Pretty-printed JSON array of [`ResultSet::transformed_documents`].
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.transformed_documents())?)
    }
}

impl std::ops::Index<usize> for ResultSet {
    type Output = LineResult;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a LineResult;
    type IntoIter = std::slice::Iter<'a, LineResult>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = LineResult;
    type IntoIter = std::vec::IntoIter<LineResult>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Flat before/after record for one line, as consumed by result viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub original_log: String,
    pub error: bool,
    pub error_message: Option<String>,
    pub processed_doc: Option<Value>,
}

impl From<&LineResult> for LineRecord {
    fn from(result: &LineResult) -> Self {
        match result {
            LineResult::Success {
                original,
                transformed,
            } => LineRecord {
                original_log: original.to_string(),
                error: false,
                error_message: None,
                processed_doc: Some(transformed.clone()),
            },
            LineResult::Failure {
                original,
                error_message,
            } => LineRecord {
                original_log: original.to_string(),
                error: true,
                error_message: Some(error_message.clone()),
                processed_doc: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ResultSet {
        let mut set = ResultSet::new();
        set.extend_batch(vec![
            LineResult::success(LogLine::new("a=1"), json!({"a": 1})),
            LineResult::failure(LogLine::new("garbage"), "Provided Grok expressions do not match"),
        ]);
        set.extend_batch(vec![LineResult::success(
            LogLine::new("b=2"),
            json!({"b": 2}),
        )]);
        set
    }

    #[test]
    fn test_batches_append_in_order() {
        let set = sample();
        assert_eq!(set.len(), 3);
        assert_eq!(set[0].original(), "a=1");
        assert_eq!(set[1].original(), "garbage");
        assert_eq!(set.get(2).map(|r| r.original().as_str()), Some("b=2"));
        assert!(set.get(3).is_none());
        assert_eq!(set.succeeded(), 2);
        assert_eq!(set.failed(), 1);
    }

    #[test]
    fn test_line_result_tagged_serialization() {
        let value = serde_json::to_value(&sample()[1]).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "failure",
                "original": "garbage",
                "error_message": "Provided Grok expressions do not match"
            })
        );
    }

    #[test]
    fn test_records_use_viewer_shape() {
        let records = sample().to_records();
        assert_eq!(
            serde_json::to_value(&records[0]).unwrap(),
            json!({
                "original_log": "a=1",
                "error": false,
                "error_message": null,
                "processed_doc": {"a": 1}
            })
        );
        assert!(records[1].error);
        assert_eq!(records[1].processed_doc, None);
    }

    #[test]
    fn test_export_substitutes_error_messages() {
        let exported: Value = serde_json::from_str(&sample().export_json().unwrap()).unwrap();
        assert_eq!(
            exported,
            json!([{"a": 1}, "Provided Grok expressions do not match", {"b": 2}])
        );
    }
}
