use super::*;
use crate::config::EmbeddingConfig;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const DIMENSION: usize = 4;

fn test_embedding_config(endpoint: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        endpoint: format!("{}/v1", endpoint),
        model: "test-embed".to_string(),
        dimension: DIMENSION,
        batch_size: 8,
        timeout_secs: 5,
        retry_attempts: 2,
        backoff_ms: 1,
        concurrency: 2,
    }
}

/// Embeds each text along an axis picked by its first token: texts starting
/// with "alpha" point one way, "beta" another, everything else diagonal.
fn keyword_embedding_response(request: &Request) -> ResponseTemplate {
    let body: serde_json::Value =
        serde_json::from_slice(&request.body).expect("request body should be JSON");
    let inputs = body["input"].as_array().expect("input should be an array");

    let data: Vec<serde_json::Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let text = text.as_str().unwrap_or_default();
            let vector = if text.contains("alpha") {
                [1.0, 0.0, 0.0, 0.0]
            } else if text.contains("beta") {
                [0.0, 1.0, 0.0, 0.0]
            } else {
                [0.5, 0.5, 0.0, 0.0]
            };
            json!({"object": "embedding", "index": i, "embedding": vector})
        })
        .collect();

    ResponseTemplate::new(200)
        .set_body_json(json!({"object": "list", "data": data, "model": "test-embed"}))
}

async fn mock_embedding_service() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(keyword_embedding_response)
        .mount(&server)
        .await;
    server
}

async fn build_orchestrator(server: &MockServer, dir: &TempDir) -> Orchestrator {
    let embedder = Arc::new(
        EmbeddingClient::new(&test_embedding_config(&server.uri())).expect("client should build"),
    );
    let index = Arc::new(
        VectorIndex::open(dir.path(), DIMENSION)
            .await
            .expect("index should open"),
    );
    Orchestrator::new(
        embedder,
        index,
        ChunkingConfig {
            target_size: 8,
            overlap: 2,
        },
    )
    .with_embed_concurrency(2)
}

#[tokio::test]
async fn ingest_then_retrieve() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let report = orchestrator
        .ingest_document(
            "notes.txt",
            "alpha one two three four five six seven alpha eight nine ten",
            "docs",
        )
        .await
        .expect("ingest should succeed");

    assert_eq!(report.source, "notes.txt");
    assert_eq!(report.chunks_written, 2);

    let results = orchestrator
        .retrieve("alpha", "docs", 5, 0.5)
        .await
        .expect("retrieve should succeed");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.source_document, "notes.txt");
}

#[tokio::test]
async fn reingesting_is_idempotent() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let text = "alpha one two three four five six seven alpha eight nine ten";
    let first = orchestrator
        .ingest_document("notes.txt", text, "docs")
        .await
        .expect("ingest should succeed");
    let second = orchestrator
        .ingest_document("notes.txt", text, "docs")
        .await
        .expect("re-ingest should succeed");

    assert_eq!(first.chunks_written, second.chunks_written);
    // Same ids, so re-ingestion replaced records instead of adding any
    assert_eq!(orchestrator.index.count("docs").await, first.chunks_written);
}

#[tokio::test]
async fn empty_document_writes_nothing() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let report = orchestrator
        .ingest_document("empty.txt", "   \n ", "docs")
        .await
        .expect("ingest should succeed");

    assert_eq!(report.chunks_written, 0);
    assert_eq!(orchestrator.index.count("docs").await, 0);
}

#[tokio::test]
async fn embedding_failure_commits_no_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let error = orchestrator
        .ingest_document("doomed.txt", "alpha beta gamma delta", "docs")
        .await
        .expect_err("ingest should fail");

    assert!(matches!(
        error,
        RagError::EmbeddingServiceUnavailable { .. }
    ));
    // Transactional at document granularity: nothing was upserted
    assert_eq!(orchestrator.index.count("docs").await, 0);
}

#[tokio::test]
async fn batch_reports_per_document_outcomes() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let documents = vec![
        SourceDocument {
            id: "a.txt".to_string(),
            text: "alpha alpha alpha".to_string(),
        },
        SourceDocument {
            id: "b.txt".to_string(),
            text: "beta beta beta".to_string(),
        },
        SourceDocument {
            id: "blank.txt".to_string(),
            text: String::new(),
        },
    ];

    let report = orchestrator
        .ingest_batch(documents, "docs", &CancelFlag::new())
        .await;

    assert_eq!(report.succeeded.len(), 3);
    assert!(report.failed.is_empty());
    assert!(!report.cancelled);
    assert_eq!(report.skipped, 0);
    assert_eq!(orchestrator.index.count("docs").await, 2);
}

#[tokio::test]
async fn cancelled_batch_skips_remaining_documents() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let cancel = CancelFlag::new();
    cancel.cancel();

    let documents = vec![
        SourceDocument {
            id: "a.txt".to_string(),
            text: "alpha".to_string(),
        },
        SourceDocument {
            id: "b.txt".to_string(),
            text: "beta".to_string(),
        },
    ];

    let report = orchestrator.ingest_batch(documents, "docs", &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.skipped, 2);
    assert!(report.succeeded.is_empty());
    assert_eq!(orchestrator.index.count("docs").await, 0);
}

#[tokio::test]
async fn answer_query_orders_context_by_score() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    orchestrator
        .ingest_document("a.txt", "alpha facts here", "docs")
        .await
        .expect("ingest should succeed");
    orchestrator
        .ingest_document("b.txt", "unrelated mixed content", "docs")
        .await
        .expect("ingest should succeed");

    let prompt = orchestrator
        .answer_query("alpha", "docs", 5, 0.2)
        .await
        .expect("query should succeed");

    assert_eq!(prompt.query, "alpha");
    assert_eq!(prompt.context.len(), 2);
    // The alpha-axis chunk scores 1.0, the diagonal one ~0.707
    assert_eq!(prompt.context[0], "alpha facts here");

    let rendered = prompt.render();
    assert!(rendered.starts_with("Context:"));
    assert!(rendered.contains("[1] alpha facts here"));
    assert!(rendered.contains("[2] unrelated mixed content"));
    assert!(rendered.ends_with("Question: alpha"));
}

#[tokio::test]
async fn answer_query_with_no_context_degrades_gracefully() {
    let server = mock_embedding_service().await;
    let dir = TempDir::new().expect("tempdir");
    let orchestrator = build_orchestrator(&server, &dir).await;

    let prompt = orchestrator
        .answer_query("alpha", "empty-collection", 5, 0.75)
        .await
        .expect("query should succeed");

    assert!(prompt.context.is_empty());
    let rendered = prompt.render();
    assert!(rendered.contains("No relevant context was found"));
    assert!(rendered.contains("Question: alpha"));

    let messages = prompt.to_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[1].role, "user");
}
