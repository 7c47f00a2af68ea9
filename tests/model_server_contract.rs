//! Black-box tests of the model server client's wire contract, mirroring
//! the teacher's `tests/llm_tests.rs` style (public-API-only, no internal
//! imports)

use futures::StreamExt;
use wherespace::config::ModelServerConfig;
use wherespace::model_client::{ChatOptions, ModelServerClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ModelServerClient {
    client_with_dim(server, 768)
}

fn client_with_dim(server: &MockServer, embedding_dim: usize) -> ModelServerClient {
    let config = ModelServerConfig {
        model_server_url: server.uri(),
        embedding_dim,
        ..ModelServerConfig::default()
    };
    ModelServerClient::new(&config)
}

#[tokio::test]
async fn embeds_text_against_live_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": [0.1, 0.2, 0.3]
        })))
        .mount(&server)
        .await;

    let client = client_with_dim(&server, 3);
    let embedding = client.embed("hello world").await.unwrap();
    assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn chat_stream_yields_deltas_in_order_and_stops_on_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"response\":\"Hello\",\"done\":false}\n",
        "{\"response\":\", world\",\"done\":false}\n",
        "{\"response\":\"!\",\"done\":true}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client
        .chat_stream("llama3.1", "say hi", ChatOptions::default())
        .await
        .unwrap();

    let mut collected = String::new();
    while let Some(delta) = stream.next().await {
        collected.push_str(&delta.unwrap());
    }

    assert_eq!(collected, "Hello, world!");
}

#[tokio::test]
async fn list_tags_returns_every_installed_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {"name": "llama3.1:latest", "size": 1234, "modified_at": "2026-01-01T00:00:00Z"},
                {"name": "nomic-embed-text", "size": 456, "modified_at": "2026-01-01T00:00:00Z"},
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let tags = client.list_tags().await.unwrap();
    assert_eq!(tags.len(), 2);
    assert!(tags.iter().any(|t| t.name == "llama3.1:latest"));
}

#[tokio::test]
async fn embed_surfaces_server_error_eventually() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.embed("hello").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn embed_retries_on_5xx_up_to_configured_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.embed("hello").await;
    assert!(result.is_err());
    // wiremock verifies the exact expected hit count (3) against this mock
    // on drop; a retry regression (break on first 5xx) would fail here.
}

#[tokio::test]
async fn embed_does_not_retry_on_4xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.embed("hello").await;
    assert!(result.is_err());
}
