//! Ingestion Coordinator (C6): orchestrates extraction, chunking,
//! embedding, and storage for a set of files
//!
//! Grounded on the teacher's `knowledge::manager::AdaptiveKnowledgeManager`
//! for its shape (a coordinator holding config plus references to the
//! components it drives, returning a per-run outcome enum) generalized
//! from memory-pruning to document ingestion.

use crate::chunker::Chunker;
use crate::config::{ChunkingConfig, IngestionConfig};
use crate::embedding_batcher::{BatchOptions, EmbedOutcome, EmbeddingBatcher};
use crate::error::Result;
use crate::extractor::Extractor;
use crate::vector_store::{ChunkRow, DocumentMeta, VectorStoreAdapter};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

/// Result of the CPU-bound extract+chunk stage for one document, computed
/// on the rayon pool ahead of the async embedding stage
enum Prepared {
    Ready { file_path: String, file_type: String, pieces: Vec<String> },
    SkippedEmpty { file_path: String },
    Failed { file_path: String, reason: String },
}

/// Outcome of ingesting a single document (§4.6)
#[derive(Debug, Clone, serde::Serialize)]
pub enum DocumentOutcome {
    Ingested { file_path: String, chunks: usize },
    SkippedExisting { file_path: String },
    SkippedEmpty { file_path: String },
    Failed { file_path: String, reason: String },
}

/// Summary of a whole ingestion run (§4.6)
#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct IngestionReport {
    pub outcomes: Vec<DocumentOutcome>,
    pub documents_capped: bool,
}

/// Coordinates C3 (extraction) -> C4 (chunking) -> C5 (embedding) -> C1
/// (storage) for a batch of files discovered by the scanner
pub struct IngestionCoordinator {
    extractor: Extractor,
    chunker: Chunker,
    batcher: EmbeddingBatcher,
    store: Arc<VectorStoreAdapter>,
    ingestion_config: IngestionConfig,
    extract_pool: rayon::ThreadPool,
}

impl IngestionCoordinator {
    pub fn new(
        ingestion_config: IngestionConfig,
        chunking_config: ChunkingConfig,
        batcher: EmbeddingBatcher,
        store: Arc<VectorStoreAdapter>,
    ) -> Self {
        let extract_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ingestion_config.max_workers_extract.max(1))
            .thread_name(|i| format!("wherespace-extract-{i}"))
            .build()
            .expect("failed to build extraction thread pool");

        Self {
            extractor: Extractor::new(&ingestion_config),
            chunker: Chunker::new(chunking_config),
            batcher,
            store,
            ingestion_config,
            extract_pool,
        }
    }

    /// Ingest every file in `paths`, honoring `max_documents_per_run` as a
    /// soft cap (§9 Open Question: extra files are reported, not silently
    /// dropped) and `skip_existing` to avoid re-embedding unchanged files.
    /// `max_documents` overrides the configured cap for this run when set
    /// (§4.10).
    ///
    /// Extraction and chunking (CPU-bound) run across the rayon pool for
    /// the whole batch before the async embedding/storage stage starts for
    /// any of them, so a slow PDF doesn't serialize behind document order.
    pub async fn ingest(&self, mut paths: Vec<PathBuf>, max_documents: Option<usize>) -> IngestionReport {
        let mut report = IngestionReport::default();

        let cap = max_documents.unwrap_or(self.ingestion_config.max_documents_per_run);
        let capped = paths.len() > cap;
        if capped {
            warn!(total = paths.len(), cap, "ingestion run exceeds max_documents_per_run, processing the first batch only");
            paths.truncate(cap);
        }
        report.documents_capped = capped;

        let mut pending = Vec::with_capacity(paths.len());
        for path in &paths {
            if self.ingestion_config.skip_existing {
                match self.should_skip(path).await {
                    Ok(true) => {
                        report.outcomes.push(DocumentOutcome::SkippedExisting {
                            file_path: path.display().to_string(),
                        });
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed checking existing metadata, proceeding with ingestion");
                    }
                }
            }
            pending.push(path.clone());
        }

        let prepared: Vec<Prepared> = self
            .extract_pool
            .install(|| pending.par_iter().map(|path| self.prepare(path)).collect());

        for p in prepared {
            let outcome = match p {
                Prepared::SkippedEmpty { file_path } => DocumentOutcome::SkippedEmpty { file_path },
                Prepared::Failed { file_path, reason } => DocumentOutcome::Failed { file_path, reason },
                Prepared::Ready { file_path, file_type, pieces } => {
                    self.embed_and_store(file_path, file_type, pieces).await
                }
            };
            report.outcomes.push(outcome);
        }

        report
    }

    /// CPU-bound stage: extract text and chunk it. Runs on the rayon pool.
    fn prepare(&self, path: &Path) -> Prepared {
        let file_path = path.display().to_string();

        let extracted = match self.extractor.extract(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => return Prepared::SkippedEmpty { file_path },
            Err(e) => {
                return Prepared::Failed {
                    file_path,
                    reason: e.to_string(),
                }
            }
        };

        let pieces = self.chunker.chunk(&extracted.text);
        if pieces.is_empty() {
            return Prepared::SkippedEmpty { file_path };
        }

        Prepared::Ready {
            file_path,
            file_type: extracted.file_type,
            pieces,
        }
    }

    /// Async stage: embed the prepared pieces and write them atomically
    /// (§4.6 per-document atomicity: nothing is written if embedding fails
    /// partway through)
    async fn embed_and_store(&self, file_path: String, file_type: String, pieces: Vec<String>) -> DocumentOutcome {
        let path = Path::new(&file_path);

        let outcomes = self
            .batcher
            .embed_many(
                pieces.clone(),
                BatchOptions {
                    max_workers: self.ingestion_config.max_workers_embed,
                    batch_size: self.ingestion_config.embed_batch_size,
                },
                None,
            )
            .await;

        let mut rows = Vec::with_capacity(pieces.len());
        for (idx, (content, outcome)) in pieces.into_iter().zip(outcomes).enumerate() {
            match outcome {
                EmbedOutcome::Ok(embedding) => {
                    rows.push(ChunkRow {
                        chunk_index: idx as i32,
                        content_preview: preview(&content),
                        content,
                        embedding,
                    });
                }
                EmbedOutcome::Failed(e) => {
                    return DocumentOutcome::Failed {
                        file_path,
                        reason: format!("embedding failed at chunk {idx}: {e}"),
                    };
                }
            }
        }

        let meta = match file_document_meta(path, &file_type) {
            Ok(meta) => meta,
            Err(e) => {
                return DocumentOutcome::Failed {
                    file_path,
                    reason: e.to_string(),
                }
            }
        };

        let chunk_count = rows.len();
        match self.store.replace_document_chunks(&file_path, meta, rows).await {
            Ok(()) => {
                info!(path = %file_path, chunks = chunk_count, "document ingested");
                DocumentOutcome::Ingested {
                    file_path,
                    chunks: chunk_count,
                }
            }
            Err(e) => DocumentOutcome::Failed {
                file_path,
                reason: e.to_string(),
            },
        }
    }

    async fn should_skip(&self, path: &Path) -> Result<bool> {
        let file_path = path.display().to_string();
        let Some((stored_size, stored_mtime)) = self.store.existing_meta(&file_path).await? else {
            return Ok(false);
        };
        let metadata = std::fs::metadata(path)?;
        let current_size = metadata.len() as i64;
        let current_mtime = mtime_of(&metadata);
        Ok(stored_size == current_size && (stored_mtime - current_mtime).abs() < 1.0)
    }
}

fn file_document_meta(path: &Path, file_type: &str) -> std::io::Result<DocumentMeta> {
    let metadata = std::fs::metadata(path)?;
    Ok(DocumentMeta {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_type: file_type.to_string(),
        file_size: metadata.len() as i64,
        modified_time: mtime_of(&metadata),
    })
}

fn mtime_of(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// First 200 characters of `content`, used as a lightweight row preview
/// for document listings without hauling full chunk text over the wire
fn preview(content: &str) -> String {
    content.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert_eq!(preview(&long).chars().count(), 200);
    }

    #[test]
    fn test_preview_shorter_than_limit() {
        assert_eq!(preview("short"), "short");
    }
}
