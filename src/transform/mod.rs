//! Transform client abstraction: the call boundary to the ingest pipeline service.
//!
//! This module defines the `TransformClient` trait so the orchestrator can be
//! driven by the real Elasticsearch simulate API or by a scripted mock.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::batch::Batch;
use crate::error::{Result, VolleyError};
use crate::results::LineResult;

pub mod mock;

pub use mock::{MockCall, MockOutcome, MockTransformClient};

/// Where the transformation service lives and how to authenticate to it.
///
/// Validated by whoever collected it before it reaches this crate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    /// Base URL of the cluster (e.g. <https://localhost:9200>)
    pub url: String,
    pub username: String,
    /// Password or API key, sent with HTTP basic auth
    #[serde(skip_serializing)]
    pub password: String,
}

impl ConnectionContext {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// URL of the simulate endpoint for `pipeline_id`.
    ///
    /// The pipeline id is appended as a single, percent-encoded path segment.
    pub fn simulate_url(&self, pipeline_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| {
            VolleyError::transform(format!("Invalid cluster URL '{}': {}", self.url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| VolleyError::transform(format!("Invalid cluster URL '{}'", self.url)))?
            .pop_if_empty()
            .extend(["_ingest", "pipeline", pipeline_id, "_simulate"]);
        Ok(url)
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Trait for submitting a batch of lines to an ingest pipeline.
///
/// Implementations return exactly one [`LineResult`] per line of the batch,
/// in batch order, with `original` equal to the submitted line. A line the
/// pipeline rejects is a [`LineResult::Failure`]; a call that fails as a
/// whole is a [`VolleyError::TransformFailure`].
#[async_trait]
pub trait TransformClient: Send + Sync {
    /// Submit one batch.
    ///
    /// # Errors
    /// Returns [`VolleyError::TransformFailure`] if:
    /// - the service can't be reached or times out
    /// - the service answers with an error status (bad credentials, unknown pipeline)
    /// - the response can't be matched up with the submitted lines
    async fn submit(
        &self,
        batch: &Batch,
        pipeline_id: &str,
        connection: &ConnectionContext,
    ) -> Result<Vec<LineResult>>;
}

/// Configuration for [`ElasticsearchClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformClientConfig {
    /// Timeout for each simulate call in milliseconds
    pub timeout_ms: u64,

    /// Skip TLS certificate verification (self-signed development clusters)
    pub accept_invalid_certs: bool,
}

impl Default for TransformClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            accept_invalid_certs: false,
        }
    }
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Transform client backed by the Elasticsearch ingest simulate API.
///
/// Each batch becomes one `POST {url}/_ingest/pipeline/{id}/_simulate` call
/// whose documents carry the log line in `_source.message`.
#[derive(Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    config: TransformClientConfig,
}

impl ElasticsearchClient {
    /// Create a client with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(TransformClientConfig::default())
    }

    pub fn with_config(config: TransformClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { client, config })
    }

    /// Wrap an existing reqwest client (shared connection pool, custom TLS).
    pub fn from_client(client: reqwest::Client, config: TransformClientConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &TransformClientConfig {
        &self.config
    }
}

#[derive(Serialize)]
struct SimulateRequest<'a> {
    docs: Vec<SimulateDoc<'a>>,
}

#[derive(Serialize)]
struct SimulateDoc<'a> {
    #[serde(rename = "_source")]
    source: MessageSource<'a>,
}

#[derive(Serialize)]
struct MessageSource<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct SimulateResponse {
    #[serde(default)]
    docs: Vec<Value>,
}

#[async_trait]
impl TransformClient for ElasticsearchClient {
    #[tracing::instrument(skip(self, batch, connection), fields(pipeline = %pipeline_id, batch_index = batch.index, lines = batch.len()))]
    async fn submit(
        &self,
        batch: &Batch,
        pipeline_id: &str,
        connection: &ConnectionContext,
    ) -> Result<Vec<LineResult>> {
        let url = connection.simulate_url(pipeline_id)?;

        let body = SimulateRequest {
            docs: batch
                .lines()
                .iter()
                .map(|line| SimulateDoc {
                    source: MessageSource {
                        message: line.as_str(),
                    },
                })
                .collect(),
        };

        tracing::debug!(
            url = %url,
            timeout_ms = self.config.timeout_ms,
            "Submitting batch to simulate API"
        );

        let response = self
            .client
            .post(url.clone())
            .basic_auth(&connection.username, Some(&connection.password))
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Simulate request failed");
                VolleyError::transform(format!("Pipeline simulation failed: {}", e))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            VolleyError::transform(format!("Failed to read simulate response: {}", e))
        })?;

        if !status.is_success() {
            let message = error_reason(&text)
                .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), text));
            tracing::error!(status = status.as_u16(), error = %message, "Simulate API returned an error");
            return Err(VolleyError::transform(message));
        }

        let parsed: SimulateResponse = serde_json::from_str(&text).map_err(|e| {
            VolleyError::transform(format!("Malformed simulate response: {}", e))
        })?;

        tracing::trace!(docs = parsed.docs.len(), "Simulate API responded");

        map_simulated_docs(batch, parsed.docs)
    }
}

/// Pull `error.reason` (or a bare string `error`) out of an error body.
fn error_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(reason) => Some(reason.clone()),
        error => error
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Pair simulated documents with the lines that produced them.
fn map_simulated_docs(batch: &Batch, docs: Vec<Value>) -> Result<Vec<LineResult>> {
    if docs.len() != batch.len() {
        return Err(VolleyError::transform(format!(
            "Simulate API returned {} documents for a batch of {} lines",
            docs.len(),
            batch.len()
        )));
    }

    Ok(batch
        .lines()
        .iter()
        .zip(docs)
        .map(|(line, doc)| match doc.get("error") {
            Some(error) => {
                let reason = error
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                LineResult::failure(line.clone(), reason)
            }
            None => {
                let source = doc
                    .pointer("/doc/_source")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                LineResult::success(line.clone(), source)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::batch_lines;
    use crate::lines::split_lines;

    fn batch_of(raw: &str) -> Batch {
        batch_lines(split_lines(raw), 100).unwrap().remove(0)
    }

    #[test]
    fn test_simulate_url_joins_segments() {
        let connection = ConnectionContext::new("https://es.local:9200/", "elastic", "pw");
        assert_eq!(
            connection.simulate_url("nginx-access").unwrap().as_str(),
            "https://es.local:9200/_ingest/pipeline/nginx-access/_simulate"
        );

        let proxied = ConnectionContext::new("https://proxy.local/es", "elastic", "pw");
        assert_eq!(
            proxied.simulate_url("a b").unwrap().as_str(),
            "https://proxy.local/es/_ingest/pipeline/a%20b/_simulate"
        );
    }

    #[test]
    fn test_simulate_url_rejects_garbage() {
        let connection = ConnectionContext::new("not a url", "elastic", "pw");
        assert!(matches!(
            connection.simulate_url("p"),
            Err(VolleyError::TransformFailure { .. })
        ));
    }

    #[test]
    fn test_password_redacted_from_debug_and_json() {
        let connection = ConnectionContext::new("http://es:9200", "elastic", "hunter2");
        assert!(!format!("{:?}", connection).contains("hunter2"));
        assert!(!serde_json::to_string(&connection).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_map_docs_success_and_failure() {
        let batch = batch_of("a=1\nbad line");
        let docs = vec![
            json!({"doc": {"_index": "_index", "_source": {"a": "1", "message": "a=1"}}}),
            json!({"error": {"type": "illegal_argument_exception", "reason": "field [x] not present"}}),
        ];

        let results = map_simulated_docs(&batch, docs).unwrap();
        assert_eq!(
            results,
            vec![
                LineResult::success("a=1".into(), json!({"a": "1", "message": "a=1"})),
                LineResult::failure("bad line".into(), "field [x] not present"),
            ]
        );
    }

    #[test]
    fn test_map_docs_defaults() {
        let batch = batch_of("x\ny");
        let results = map_simulated_docs(&batch, vec![json!({}), json!({"error": {}})]).unwrap();
        assert_eq!(results[0].transformed(), Some(&json!({})));
        assert_eq!(results[1].error_message(), Some("Unknown error"));
    }

    #[test]
    fn test_map_docs_length_mismatch() {
        let batch = batch_of("x\ny");
        let result = map_simulated_docs(&batch, vec![json!({})]);
        assert!(matches!(result, Err(VolleyError::TransformFailure { .. })));
    }

    #[test]
    fn test_client_config_defaults() {
        let config: TransformClientConfig =
            serde_json::from_str(r#"{"accept_invalid_certs": true}"#).unwrap();
        assert_eq!(config.timeout_ms, 30_000);
        assert!(config.accept_invalid_certs);

        let client = ElasticsearchClient::with_config(config.clone()).unwrap();
        assert_eq!(client.config(), &config);
    }

    #[test]
    fn test_error_reason_shapes() {
        assert_eq!(
            error_reason(r#"{"error":{"type":"resource_not_found_exception","reason":"pipeline not found"},"status":404}"#),
            Some("pipeline not found".to_string())
        );
        assert_eq!(
            error_reason(r#"{"error":"Unauthorized"}"#),
            Some("Unauthorized".to_string())
        );
        assert_eq!(error_reason("<html>502</html>"), None);
    }
}
