//! Embedding Batcher (C5): bounded-concurrency embedding of many texts
//!
//! Grounded on the teacher's `llm::connection_pool::OllamaConnectionPool`
//! (semaphore-bounded concurrency, `Drop`-released permits) combined with
//! the batched `futures::future::join_all` fan-out in
//! `knowledge::fetcher::WebFetcher` and `mcp.rs`.

use crate::error::{EmbeddingError, WhereSpaceError};
use crate::model_client::ModelServerClient;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Per-item outcome for a batch embedding run. A single bad document must
/// never abort the whole batch (§4.5 edge case).
pub enum EmbedOutcome {
    Ok(Vec<f32>),
    Failed(WhereSpaceError),
}

/// Progress callback invoked after each item completes: `(done, total)`
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

/// Parameters for a single `embed_many` call
pub struct BatchOptions {
    pub max_workers: usize,
    pub batch_size: usize,
}

/// Bounded-concurrency embedder sitting on top of `ModelServerClient`
pub struct EmbeddingBatcher {
    client: Arc<ModelServerClient>,
}

impl EmbeddingBatcher {
    pub fn new(client: Arc<ModelServerClient>) -> Self {
        Self { client }
    }

    /// Embed every text in `texts`, preserving input order in the result.
    /// Runs at most `options.max_workers` embed calls concurrently via a
    /// semaphore, in `options.batch_size`-sized waves. `on_progress` fires
    /// at most once per `batch_size` completions (plus a final call at
    /// `total`), not once per item (§4.5).
    pub async fn embed_many(
        &self,
        texts: Vec<String>,
        options: BatchOptions,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Vec<EmbedOutcome> {
        let total = texts.len();
        let batch_size = options.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(options.max_workers.max(1)));
        let mut results = Vec::with_capacity(total);
        let mut done = 0usize;

        for wave in texts.chunks(batch_size) {
            let futures = wave.iter().map(|text| {
                let semaphore = semaphore.clone();
                let client = self.client.clone();
                let text = text.clone();
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("embedding semaphore should not be closed");
                    client.embed(&text).await
                }
            });

            let wave_results = futures::future::join_all(futures).await;
            for result in wave_results {
                done += 1;
                match result {
                    Ok(embedding) => results.push(EmbedOutcome::Ok(embedding)),
                    Err(e) => {
                        warn!(error = %e, "embedding failed for one document chunk, continuing batch");
                        results.push(EmbedOutcome::Failed(e));
                    }
                }
                if let Some(cb) = on_progress {
                    if done % batch_size == 0 || done == total {
                        cb(done, total);
                    }
                }
            }
        }

        debug!(total, failed = results.iter().filter(|r| matches!(r, EmbedOutcome::Failed(_))).count(), "embedding batch complete");
        results
    }
}

impl EmbedOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, EmbedOutcome::Ok(_))
    }
}

#[allow(dead_code)]
fn dimension_error(expected: usize, actual: usize) -> WhereSpaceError {
    EmbeddingError::DimensionMismatch { expected, actual }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelServerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_client(server: &MockServer) -> Arc<ModelServerClient> {
        let config = ModelServerConfig {
            model_server_url: server.uri(),
            ..ModelServerConfig::default()
        };
        Arc::new(ModelServerClient::new(&config))
    }

    #[tokio::test]
    async fn test_embed_many_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [1.0, 2.0, 3.0]
            })))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let batcher = EmbeddingBatcher::new(client);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = batcher
            .embed_many(
                texts,
                BatchOptions {
                    max_workers: 2,
                    batch_size: 2,
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_embed_many_progress_callback_fires_once_per_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [1.0]
            })))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let batcher = EmbeddingBatcher::new(client);
        let seen = std::sync::Mutex::new(Vec::new());
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string(), "e".to_string()];
        let _ = batcher
            .embed_many(
                texts,
                BatchOptions {
                    max_workers: 4,
                    batch_size: 2,
                },
                Some(&|done, total| seen.lock().unwrap().push((done, total))),
            )
            .await;

        let seen = seen.into_inner().unwrap();
        // 5 items, batch_size 2: callback fires at done=2, done=4, and a
        // final call at done=5 (the trailing partial batch plus the
        // done==total rule), never once per item.
        assert_eq!(seen, vec![(2, 5), (4, 5), (5, 5)]);
    }
}
