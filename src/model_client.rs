//! Model Server Client (C2): HTTP client for the external embedding/chat
//! service, speaking the wire contract in spec §6.2.
//!
//! Grounded on the teacher's `llm::OllamaClient` (reqwest, hand-rolled JSON
//! request/response types, `tokio::time::timeout` wrapping every call) with
//! streaming added via `reqwest::Response::bytes_stream` the way the
//! pack's `AgentStream` (`llmspell-core::types::streaming`) models a pinned,
//! boxed `futures::Stream` of response chunks.

use crate::config::ModelServerConfig;
use crate::error::{EmbeddingError, Result, WhereSpaceError};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const EMBED_RETRY_DELAYS_MS: [u64; 3] = [500, 1_000, 2_000];
const TAGS_RETRY_ATTEMPTS: u32 = 2;

/// Chat generation options forwarded to the model server (§6.2)
#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatOptions {
    pub temperature: f32,
}

/// One available model tag (§4.11, §6.2)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

/// A lazily-produced sequence of text deltas; finite, consumer-cancellable
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a ChatOptions,
}

#[derive(Deserialize)]
struct ChatDelta {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagInfo>,
}

/// HTTP client for `/api/embeddings`, `/api/chat`, `/api/tags` (§6.2)
#[derive(Clone)]
pub struct ModelServerClient {
    http: reqwest::Client,
    base_url: String,
    embedding_model: String,
    embedding_dim: usize,
    embed_timeout: Duration,
    chat_idle_timeout: Duration,
    tags_timeout: Duration,
}

impl ModelServerClient {
    pub fn new(config: &ModelServerConfig) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build model server HTTP client");

        Self {
            http,
            base_url: config.model_server_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            embedding_dim: config.embedding_dim,
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
            chat_idle_timeout: Duration::from_secs(config.chat_idle_timeout_secs),
            tags_timeout: Duration::from_secs(config.tags_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// POST `/api/embeddings`; up to 3 attempts on transient failure, no
    /// retry on 4xx or malformed response (§4.2)
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_err: Option<WhereSpaceError> = None;

        for (attempt, delay_ms) in EMBED_RETRY_DELAYS_MS.iter().enumerate() {
            match self.embed_once(text).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let retryable = e.is_retryable();
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempt + 1 < EMBED_RETRY_DELAYS_MS.len() {
                        warn!("embed attempt {} failed (retryable); backing off", attempt + 1);
                        tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            WhereSpaceError::Embedding(EmbeddingError::InvalidResponse("no attempts made".into()))
        }))
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response = timeout(
            self.embed_timeout,
            self.http.post(self.url("embeddings")).json(&request).send(),
        )
        .await
        .map_err(|_| WhereSpaceError::Embedding(EmbeddingError::Timeout))?
        .map_err(|e| WhereSpaceError::Embedding(EmbeddingError::ConnectionFailed(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhereSpaceError::Embedding(EmbeddingError::BadResponse {
                status: status.as_u16(),
                body,
            }));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| WhereSpaceError::Embedding(EmbeddingError::InvalidResponse(e.to_string())))?;

        if parsed.embedding.len() != self.embedding_dim {
            return Err(WhereSpaceError::Embedding(EmbeddingError::DimensionMismatch {
                expected: self.embedding_dim,
                actual: parsed.embedding.len(),
            }));
        }

        Ok(parsed.embedding)
    }

    /// POST `/api/chat` with `stream: true`; yields text deltas as
    /// newline-delimited JSON objects arrive, terminates on `done: true` or
    /// connection close. No retry; partial streams are not replayable (§4.2)
    pub async fn chat_stream(
        &self,
        model: &str,
        prompt: &str,
        options: ChatOptions,
    ) -> Result<ChatStream> {
        let request = ChatRequest {
            model,
            prompt,
            stream: true,
            options: &options,
        };

        let response = self
            .http
            .post(self.url("chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| WhereSpaceError::Embedding(EmbeddingError::ConnectionFailed(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhereSpaceError::Embedding(EmbeddingError::BadResponse {
                status: status.as_u16(),
                body,
            }));
        }

        let state = ChatStreamState {
            byte_stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            done: false,
            idle_timeout: self.chat_idle_timeout,
        };

        // Dropping the returned stream drops `byte_stream` (and the
        // underlying `reqwest` response body future with it), which aborts
        // the in-flight HTTP request -- this is how a client disconnect
        // cancels the upstream chat request (P11).
        let deltas = stream::unfold(state, Self::next_delta);
        Ok(Box::pin(deltas))
    }

    async fn next_delta(mut state: ChatStreamState) -> Option<(Result<String>, ChatStreamState)> {
        loop {
            if state.done {
                return None;
            }

            if let Some(pos) = state.buffer.find('\n') {
                let line = state.buffer[..pos].to_string();
                state.buffer.drain(..=pos);
                if line.trim().is_empty() {
                    continue;
                }
                let result = Self::parse_delta_line(&line, &mut state.done);
                return Some((result, state));
            }

            match timeout(state.idle_timeout, state.byte_stream.next()).await {
                Ok(Some(Ok(bytes))) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    continue;
                }
                Ok(Some(Err(e))) => {
                    state.done = true;
                    let err = WhereSpaceError::Embedding(EmbeddingError::ConnectionFailed(
                        e.to_string(),
                    ));
                    return Some((Err(err), state));
                }
                Ok(None) => {
                    state.done = true;
                    if state.buffer.trim().is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut state.buffer);
                    let result = Self::parse_delta_line(&line, &mut state.done);
                    return Some((result, state));
                }
                Err(_elapsed) => {
                    state.done = true;
                    return Some((
                        Err(WhereSpaceError::Embedding(EmbeddingError::Timeout)),
                        state,
                    ));
                }
            }
        }
    }

    fn parse_delta_line(line: &str, done: &mut bool) -> Result<String> {
        let parsed: ChatDelta = serde_json::from_str(line).map_err(|e| {
            WhereSpaceError::Embedding(EmbeddingError::InvalidResponse(e.to_string()))
        })?;
        if parsed.done {
            *done = true;
        }
        Ok(parsed.response)
    }

    /// GET `/api/tags`; up to 2 attempts (§4.2)
    pub async fn list_tags(&self) -> Result<Vec<TagInfo>> {
        let mut last_err: Option<WhereSpaceError> = None;
        for attempt in 1..=TAGS_RETRY_ATTEMPTS {
            match self.list_tags_once().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    debug!("list_tags attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            WhereSpaceError::Embedding(EmbeddingError::InvalidResponse("no attempts made".into()))
        }))
    }

    async fn list_tags_once(&self) -> Result<Vec<TagInfo>> {
        let response = timeout(self.tags_timeout, self.http.get(self.url("tags")).send())
            .await
            .map_err(|_| WhereSpaceError::Embedding(EmbeddingError::Timeout))?
            .map_err(|e| {
                WhereSpaceError::Embedding(EmbeddingError::ConnectionFailed(e.to_string()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhereSpaceError::Embedding(EmbeddingError::BadResponse {
                status: status.as_u16(),
                body,
            }));
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| WhereSpaceError::Embedding(EmbeddingError::InvalidResponse(e.to_string())))?;
        Ok(parsed.models)
    }
}

/// Internal state threaded through `stream::unfold` for `chat_stream`
struct ChatStreamState {
    byte_stream: Pin<Box<dyn Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    done: bool,
    idle_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: String) -> ModelServerConfig {
        ModelServerConfig {
            model_server_url: url,
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dim: 4,
            embed_timeout_secs: 5,
            chat_idle_timeout_secs: 5,
            tags_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.1, 0.2, 0.3, 0.4]
            })))
            .mount(&server)
            .await;

        let client = ModelServerClient::new(&test_config(server.uri()));
        let embedding = client.embed("hello world").await.unwrap();
        assert_eq!(embedding.len(), 4);
    }

    #[tokio::test]
    async fn test_embed_dimension_mismatch_not_retried_forever() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.1, 0.2]
            })))
            .mount(&server)
            .await;

        let client = ModelServerClient::new(&test_config(server.uri()));
        let result = client.embed("hello world").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_embed_4xx_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = ModelServerClient::new(&test_config(server.uri()));
        let result = client.embed("hello world").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3.1:latest", "size": 123, "modified_at": "2026-01-01"}]
            })))
            .mount(&server)
            .await;

        let client = ModelServerClient::new(&test_config(server.uri()));
        let tags = client.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "llama3.1:latest");
    }

    #[tokio::test]
    async fn test_chat_stream_collects_deltas_and_stops_on_done() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"Hello\",\"done\":false}\n{\"response\":\" world\",\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = ModelServerClient::new(&test_config(server.uri()));
        let mut stream = client
            .chat_stream("llama3.1", "hi", ChatOptions::default())
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(delta) = stream.next().await {
            collected.push_str(&delta.unwrap());
        }
        assert_eq!(collected, "Hello world");
    }
}
