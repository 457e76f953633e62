//! End-to-end client tests using a wiremock mock server.
//!
//! These verify what actually goes over the wire: authentication headers,
//! path rewriting, options merging, extra-body merging, retry behavior and
//! error parsing.

use std::sync::Arc;
use std::time::Duration;

use genai_client::{
    Client, Config, Error, HttpOptions, RetryPolicy, StaticCredentials,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Clone)]
struct SequenceResponder {
    templates: Arc<std::sync::Mutex<std::collections::VecDeque<ResponseTemplate>>>,
}

impl SequenceResponder {
    fn new(templates: Vec<ResponseTemplate>) -> Self {
        Self {
            templates: Arc::new(std::sync::Mutex::new(templates.into_iter().collect())),
        }
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _req: &Request) -> ResponseTemplate {
        let mut templates = self.templates.lock().expect("mutex should not be poisoned");
        templates.pop_front().unwrap_or_else(|| {
            ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "No more mock responses configured" }
            }))
        })
    }
}

/// Key-mode client pointing at the mock server.
fn key_mode_client(server: &MockServer) -> Client {
    Client::new(Config {
        api_key: Some("test-key".into()),
        http_options: Some(HttpOptions::default().with_base_url(server.uri())),
        ..Default::default()
    })
    .expect("client creation should succeed")
}

/// Credential-mode Vertex client pointing at the mock server.
fn vertex_client(server: &MockServer) -> Client {
    Client::new(Config {
        vertex: true,
        project: Some("p".into()),
        location: Some("us-central1".into()),
        credentials: Some(Arc::new(
            StaticCredentials::new("tok").with_quota_project("billing-proj"),
        )),
        http_options: Some(HttpOptions::default().with_base_url(server.uri())),
        ..Default::default()
    })
    .expect("client creation should succeed")
}

#[tokio::test]
async fn key_mode_sends_api_key_and_default_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "contents": [{ "text": "hi" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = key_mode_client(&server);
    let resp = client
        .request(
            "POST",
            "models/gemini-2.0-flash:generateContent",
            Some(r#"{"contents":[{"text":"hi"}]}"#),
            None,
        )
        .await
        .expect("request should succeed");
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn vertex_rewrites_path_and_sends_bearer_with_quota_project() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(
            "/v1beta1/projects/p/locations/us-central1/models/gemini:generateContent",
        ))
        .and(header("authorization", "Bearer tok"))
        .and(header("x-goog-user-project", "billing-proj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = vertex_client(&server);
    client
        .request("POST", "models/gemini:generateContent", Some("{}"), None)
        .await
        .expect("request should succeed");
}

#[tokio::test]
async fn vertex_publisher_model_get_is_not_project_scoped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1beta1/publishers/google/models/gemini-2.0-flash"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = vertex_client(&server);
    client
        .request("GET", "publishers/google/models/gemini-2.0-flash", None, None)
        .await
        .expect("request should succeed");
}

#[tokio::test]
async fn extra_body_is_merged_into_the_wire_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini:generateContent"))
        .and(body_json(json!({
            "contents": [{ "text": "hi" }],
            "labels": { "team": "ml" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = key_mode_client(&server);
    let per_call = HttpOptions::default().with_extra_body(
        json!({ "labels": { "team": "ml" } })
            .as_object()
            .cloned()
            .expect("object"),
    );
    client
        .request(
            "POST",
            "models/gemini:generateContent",
            Some(r#"{"contents":[{"text":"hi"}]}"#),
            Some(&per_call),
        )
        .await
        .expect("request should succeed");
}

#[tokio::test]
async fn per_call_timeout_synthesizes_server_timeout_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .and(header("X-Server-Timeout", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = key_mode_client(&server);
    let per_call = HttpOptions::default().with_timeout(Duration::from_millis(2500));
    client
        .request("GET", "models", None, Some(&per_call))
        .await
        .expect("request should succeed");
}

#[tokio::test]
async fn retries_on_server_error_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini:generateContent"))
        .respond_with(SequenceResponder::new(vec![
            ResponseTemplate::new(500).set_body_json(json!({
                "error": { "code": 500, "message": "server error", "status": "INTERNAL" }
            })),
            ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })),
        ]))
        .expect(2)
        .mount(&server)
        .await;

    let client = Client::new(Config {
        api_key: Some("test-key".into()),
        http_options: Some(
            HttpOptions::default()
                .with_base_url(server.uri())
                .with_retry(RetryPolicy {
                    max_attempts: 2,
                    base_backoff: Duration::from_millis(0),
                    max_backoff: Duration::from_millis(1),
                    ..Default::default()
                }),
        ),
        ..Default::default()
    })
    .expect("client creation should succeed");

    let resp = client
        .request("POST", "models/gemini:generateContent", Some("{}"), None)
        .await
        .expect("request should succeed after retry");
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn google_error_envelope_is_parsed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/bad:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Invalid model specified",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(Config {
        api_key: Some("test-key".into()),
        http_options: Some(
            HttpOptions::default()
                .with_base_url(server.uri())
                .disable_retry(),
        ),
        ..Default::default()
    })
    .expect("client creation should succeed");

    let err = client
        .request("POST", "models/bad:generateContent", Some("{}"), None)
        .await
        .expect_err("request should fail");
    match err {
        Error::Api(api) => {
            assert_eq!(api.status, 400);
            assert_eq!(api.code.as_deref(), Some("INVALID_ARGUMENT"));
            assert!(api.message.contains("Invalid model"));
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_method_fails_before_any_io() {
    let server = MockServer::start().await;
    let client = key_mode_client(&server);

    let err = client
        .request("TRACE", "models", None, None)
        .await
        .expect_err("unsupported method should fail");
    assert!(matches!(err, Error::Config(_)));

    let requests = server
        .received_requests()
        .await
        .expect("should be able to read received requests");
    assert!(
        requests.is_empty(),
        "request should not be sent for an unsupported method"
    );
}

#[tokio::test]
async fn upload_posts_raw_bytes_with_octet_stream() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/files"))
        .and(header("content-type", "application/octet-stream"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_string("raw-upload-bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = key_mode_client(&server);
    let url = format!("{}/upload/files", server.uri());
    client
        .upload("POST", &url, b"raw-upload-bytes".to_vec(), None)
        .await
        .expect("upload should succeed");
}

#[tokio::test]
async fn upload_rejects_non_post_methods() {
    let server = MockServer::start().await;
    let client = key_mode_client(&server);
    let url = format!("{}/upload/files", server.uri());

    let err = client
        .upload("PUT", &url, vec![1, 2, 3], None)
        .await
        .expect_err("non-POST upload should fail");
    assert!(matches!(err, Error::Config(_)));
}
