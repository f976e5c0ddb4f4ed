//! Tests for the Elasticsearch simulate client against a local mock server.

use serde_json::json;
use std::sync::Arc;
use volley::batch::{Batch, batch_lines};
use volley::{
    ConnectionContext, ElasticsearchClient, Orchestrator, OrchestratorConfig, RunInput,
    TransformClient, TransformClientConfig, VolleyError, split_lines,
};
use wiremock::matchers::{basic_auth, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIMULATE_PATH: &str = "/_ingest/pipeline/nginx-access/_simulate";

fn connection(server: &MockServer) -> ConnectionContext {
    ConnectionContext::new(server.uri(), "elastic", "changeme")
}

fn single_batch(raw: &str) -> Batch {
    batch_lines(split_lines(raw), 100)
        .expect("Failed to batch lines")
        .remove(0)
}

fn simulated(source: serde_json::Value) -> serde_json::Value {
    json!({"doc": {"_index": "_index", "_id": "_id", "_source": source}})
}

#[test_log::test(tokio::test)]
async fn test_posts_lines_as_simulate_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SIMULATE_PATH))
        .and(basic_auth("elastic", "changeme"))
        .and(body_json(json!({
            "docs": [
                {"_source": {"message": "GET /a 200"}},
                {"_source": {"message": "  GET /b 404  "}}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [
                simulated(json!({"message": "GET /a 200", "status": 200})),
                simulated(json!({"message": "  GET /b 404  ", "status": 404}))
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new().unwrap();
    let batch = single_batch("GET /a 200\n  GET /b 404  ");
    let results = client
        .submit(&batch, "nginx-access", &connection(&server))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].original(), "GET /a 200");
    assert_eq!(
        results[0].transformed(),
        Some(&json!({"message": "GET /a 200", "status": 200}))
    );
    // Whitespace inside a line is sent untouched
    assert_eq!(results[1].original(), "  GET /b 404  ");
}

#[test_log::test(tokio::test)]
async fn test_per_document_errors_become_line_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SIMULATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [
                simulated(json!({"message": "ok"})),
                {"error": {
                    "root_cause": [{"type": "illegal_argument_exception", "reason": "Provided Grok expressions do not match field value"}],
                    "type": "illegal_argument_exception",
                    "reason": "Provided Grok expressions do not match field value"
                }},
                {"error": {"type": "unknown"}}
            ]
        })))
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new().unwrap();
    let results = client
        .submit(
            &single_batch("ok\nnot grok\nweird"),
            "nginx-access",
            &connection(&server),
        )
        .await
        .unwrap();

    assert!(results[0].is_success());
    assert_eq!(
        results[1].error_message(),
        Some("Provided Grok expressions do not match field value")
    );
    assert_eq!(results[2].error_message(), Some("Unknown error"));
}

#[test_log::test(tokio::test)]
async fn test_unknown_pipeline_fails_whole_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_ingest/pipeline/missing/_simulate"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "type": "resource_not_found_exception",
                "reason": "pipeline [missing] does not exist"
            },
            "status": 404
        })))
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new().unwrap();
    let result = client
        .submit(&single_batch("a\nb"), "missing", &connection(&server))
        .await;

    match result {
        Err(VolleyError::TransformFailure { message }) => {
            assert_eq!(message, "pipeline [missing] does not exist")
        }
        other => panic!("Expected TransformFailure, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_non_json_error_body_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SIMULATE_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new().unwrap();
    let error = client
        .submit(&single_batch("a"), "nginx-access", &connection(&server))
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "HTTP 502: Bad Gateway");
}

#[test_log::test(tokio::test)]
async fn test_wrong_credentials_fail_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(basic_auth("elastic", "changeme"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"docs": [simulated(json!({}))]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "type": "security_exception",
                "reason": "unable to authenticate user [elastic] for REST request [/_ingest/pipeline/nginx-access/_simulate]"
            },
            "status": 401
        })))
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new().unwrap();
    let wrong = ConnectionContext::new(server.uri(), "elastic", "wrong");
    let error = client
        .submit(&single_batch("a"), "nginx-access", &wrong)
        .await
        .unwrap_err();

    assert!(matches!(error, VolleyError::TransformFailure { .. }));
    assert!(error.to_string().starts_with("unable to authenticate user"));

    let ok = client
        .submit(&single_batch("a"), "nginx-access", &connection(&server))
        .await
        .unwrap();
    assert!(ok[0].is_success());
}

#[test_log::test(tokio::test)]
async fn test_short_or_malformed_responses_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SIMULATE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"docs": [simulated(json!({}))]})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SIMULATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new().unwrap();
    let batch = single_batch("a\nb");

    let short = client
        .submit(&batch, "nginx-access", &connection(&server))
        .await
        .unwrap_err();
    assert_eq!(
        short.to_string(),
        "Simulate API returned 1 documents for a batch of 2 lines"
    );

    let malformed = client
        .submit(&batch, "nginx-access", &connection(&server))
        .await
        .unwrap_err();
    assert!(
        malformed
            .to_string()
            .starts_with("Malformed simulate response")
    );
}

#[test_log::test(tokio::test)]
async fn test_timeout_fails_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"docs": [simulated(json!({}))]}))
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = ElasticsearchClient::with_config(TransformClientConfig {
        timeout_ms: 50,
        ..Default::default()
    })
    .unwrap();
    let error = client
        .submit(&single_batch("a"), "nginx-access", &connection(&server))
        .await
        .unwrap_err();

    assert!(
        error
            .to_string()
            .starts_with("Pipeline simulation failed")
    );
}

#[test_log::test(tokio::test)]
async fn test_orchestrated_run_against_simulate_api() {
    let server = MockServer::start().await;

    // Echo each submitted message back with a marker field, keeping order
    Mock::given(method("POST"))
        .and(path(SIMULATE_PATH))
        .respond_with(|request: &wiremock::Request| {
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).expect("request body is JSON");
            let docs: Vec<serde_json::Value> = body["docs"]
                .as_array()
                .expect("docs array")
                .iter()
                .map(|doc| {
                    let message = doc["_source"]["message"].clone();
                    simulated(json!({"message": message, "parsed": true}))
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "docs": docs }))
        })
        .expect(3)
        .mount(&server)
        .await;

    let raw = (0..45)
        .map(|i| format!("line {}", i))
        .collect::<Vec<_>>()
        .join("\n");

    let client = Arc::new(ElasticsearchClient::new().unwrap());
    let orchestrator = Orchestrator::new(client, OrchestratorConfig::default()).unwrap();
    let outcome = orchestrator
        .run(RunInput::new(raw, "nginx-access", connection(&server)))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    let results = outcome.into_result().unwrap();
    assert_eq!(results.len(), 45);
    for (i, result) in results.iter().enumerate() {
        let expected = format!("line {}", i);
        assert_eq!(result.original(), expected.as_str());
        assert_eq!(
            result.transformed(),
            Some(&json!({"message": expected, "parsed": true}))
        );
    }

    let exported: serde_json::Value = serde_json::from_str(&results.export_json().unwrap()).unwrap();
    assert_eq!(exported.as_array().map(Vec::len), Some(45));
}
