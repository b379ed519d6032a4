use super::*;
use crate::config::GenerationConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(endpoint: &str) -> GenerationConfig {
    GenerationConfig {
        endpoint: format!("{}/v1", endpoint),
        model: "test-chat".to_string(),
        timeout_secs: 5,
        retry_attempts: 3,
        backoff_ms: 1,
    }
}

#[test]
fn message_constructors() {
    let system = ChatMessage::system("be brief");
    assert_eq!(system.role, "system");
    assert_eq!(system.content, "be brief");

    let user = ChatMessage::user("hello");
    assert_eq!(user.role, "user");
}

#[tokio::test]
async fn complete_returns_answer_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "test-chat", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "The answer is 42."},
                "finish_reason": "stop",
            }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GenerationClient::new(&test_config(&server.uri())).expect("client should build");

    let answer = client
        .complete(&[ChatMessage::user("what is the answer?")])
        .expect("completion should succeed");

    assert_eq!(answer, "The answer is 42.");
}

#[tokio::test]
async fn server_errors_surface_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = GenerationClient::new(&test_config(&server.uri())).expect("client should build");

    let error = client
        .complete(&[ChatMessage::user("hello")])
        .expect_err("completion should fail");

    match error {
        RagError::GenerationServiceUnavailable { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn stream_yields_fragments_until_done() {
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\", \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = GenerationClient::new(&test_config(&server.uri())).expect("client should build");

    let stream = client
        .stream(&[ChatMessage::user("greet me")])
        .expect("stream should open");

    let fragments: Vec<String> = stream
        .collect::<crate::Result<Vec<_>>>()
        .expect("stream should yield clean fragments");

    assert_eq!(fragments, vec!["Hello", ", ", "world"]);
}

#[tokio::test]
async fn stream_ends_at_body_end_without_done_marker() {
    let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = GenerationClient::new(&test_config(&server.uri())).expect("client should build");

    let fragments: Vec<String> = client
        .stream(&[ChatMessage::user("go")])
        .expect("stream should open")
        .collect::<crate::Result<Vec<_>>>()
        .expect("stream should yield clean fragments");

    assert_eq!(fragments, vec!["partial"]);
}
