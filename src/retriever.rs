//! Retriever (C8): embeds a query, searches the vector store, re-ranks and
//! deduplicates hits, then assembles a grounded prompt
//!
//! Grounded on the teacher's `memory::SqliteMemoryStore::cosine_similarity`
//! for the near-duplicate vector comparison and
//! `knowledge::consolidator::KnowledgeConsolidator` for the
//! dedup-by-similarity-threshold shape (here specialized to exact-hash plus
//! TF-IDF cosine near-dup detection per §4.8, rather than the consolidator's
//! embedding-or-Jaccard fallback).

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::model_client::ModelServerClient;
use crate::query_cache::QueryCache;
use crate::vector_store::{Hit, VectorStoreAdapter};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A retrieved chunk annotated with the rerank score it was selected on
#[derive(Debug, Clone, serde::Serialize)]
pub struct RankedHit {
    #[serde(flatten)]
    pub hit: Hit,
    pub rerank_score: f32,
}

/// Assembled retrieval result: the prompt ready to hand to the model, plus
/// the citations it was built from (§4.8)
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalResult {
    pub prompt: String,
    pub citations: Vec<RankedHit>,
    pub from_cache: bool,
}

const SIMILARITY_WEIGHT: f32 = 0.7;
const LEXICAL_WEIGHT: f32 = 0.3;
/// Over-fetch factor so dedup/rerank still has `top_k` candidates left
/// after dropping near-duplicates
const OVERFETCH_FACTOR: usize = 2;

pub struct Retriever {
    store: Arc<VectorStoreAdapter>,
    model_client: Arc<ModelServerClient>,
    cache: Arc<QueryCache>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<VectorStoreAdapter>,
        model_client: Arc<ModelServerClient>,
        cache: Arc<QueryCache>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            model_client,
            cache,
            config,
        }
    }

    /// Retrieve context for `query` and assemble a citation-backed prompt.
    /// `file_type_filter` narrows the vector search to one extension.
    pub async fn retrieve(
        &self,
        query: &str,
        file_type_filter: Option<&str>,
    ) -> Result<RetrievalResult> {
        let embedding = self.model_client.embed(query).await?;

        let key = QueryCache::fingerprint(&embedding, self.config.top_k, file_type_filter);
        if let Some(cached) = self.cache.get(&key) {
            debug!(query, "query cache hit");
            let mut citations = self.rerank(query, cached);
            citations.truncate(self.config.top_k);
            let prompt = self.assemble_prompt(query, &citations);
            return Ok(RetrievalResult {
                prompt,
                citations,
                from_cache: true,
            });
        }

        let raw_hits = self
            .store
            .search(
                &embedding,
                self.config.top_k * OVERFETCH_FACTOR,
                self.config.min_similarity,
                file_type_filter,
            )
            .await?;

        let deduped = self.deduplicate(raw_hits);
        self.cache.put(key, deduped.clone());

        let mut citations = self.rerank(query, deduped);
        citations.truncate(self.config.top_k);
        let prompt = self.assemble_prompt(query, &citations);

        Ok(RetrievalResult {
            prompt,
            citations,
            from_cache: false,
        })
    }

    /// Build a prompt with no retrieved context, for "direct" / non-RAG
    /// queries (§4.10 `/api/query_direct_stream`)
    pub fn direct_prompt(query: &str) -> String {
        query.to_string()
    }

    /// Drop exact content duplicates (by hash) and near-duplicates (TF-IDF
    /// cosine similarity above `near_duplicate_threshold`) (§4.8)
    fn deduplicate(&self, hits: Vec<Hit>) -> Vec<Hit> {
        let mut seen_hashes = std::collections::HashSet::new();
        let mut unique: Vec<(Hit, HashMap<String, f32>)> = Vec::new();

        for hit in hits {
            let hash = content_hash(&hit.content);
            if !seen_hashes.insert(hash) {
                continue;
            }

            let vector = tf_idf_vector(&hit.content);
            let is_near_dup = unique.iter().any(|(_, existing_vector)| {
                cosine_similarity_sparse(&vector, existing_vector) >= self.config.near_duplicate_threshold
            });

            if !is_near_dup {
                unique.push((hit, vector));
            }
        }

        unique.into_iter().map(|(hit, _)| hit).collect()
    }

    /// Rerank hits by `0.7 * similarity + 0.3 * lexical_coverage`, where
    /// lexical coverage is the fraction of query terms present in the
    /// chunk (§4.8)
    fn rerank(&self, query: &str, hits: Vec<Hit>) -> Vec<RankedHit> {
        let query_terms: Vec<String> = tokenize(query);
        let mut ranked: Vec<RankedHit> = hits
            .into_iter()
            .map(|hit| {
                let coverage = lexical_coverage(&query_terms, &hit.content);
                let score = SIMILARITY_WEIGHT * hit.similarity + LEXICAL_WEIGHT * coverage;
                RankedHit {
                    hit,
                    rerank_score: score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.hit.file_path.cmp(&b.hit.file_path))
                .then_with(|| a.hit.chunk_index.cmp(&b.hit.chunk_index))
        });
        ranked
    }

    /// Assemble the final prompt: numbered citation envelope followed by
    /// the user's question, so the model can ground its answer and refer
    /// back to sources by index
    fn assemble_prompt(&self, query: &str, citations: &[RankedHit]) -> String {
        if citations.is_empty() {
            return query.to_string();
        }

        let mut prompt = String::from("Answer the question using only the context below. Cite sources by number.\n\n");
        for (i, citation) in citations.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] ({}, chunk {})\n{}\n\n",
                i + 1,
                citation.hit.file_name,
                citation.hit.chunk_index,
                truncate_for_prompt(&citation.hit.content, self.config.max_prompt_tokens / citations.len().max(1))
            ));
        }
        prompt.push_str(&format!("Question: {query}\n"));
        prompt
    }
}

fn content_hash(content: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Fraction of query terms that appear at least once in `content`
fn lexical_coverage(query_terms: &[String], content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms: std::collections::HashSet<String> = tokenize(content).into_iter().collect();
    let matched = query_terms.iter().filter(|t| content_terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}

/// Sparse term-frequency vector (unnormalized counts), used as a cheap
/// stand-in for a full corpus TF-IDF model when comparing two chunks in
/// isolation
fn tf_idf_vector(content: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for term in tokenize(content) {
        *counts.entry(term).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine_similarity_sparse(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a.iter().map(|(term, count)| count * b.get(term).copied().unwrap_or(0.0)).sum();
    let norm_a: f32 = a.values().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn truncate_for_prompt(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        content.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(content: &str, similarity: f32) -> Hit {
        Hit {
            file_path: "a.txt".to_string(),
            file_name: "a.txt".to_string(),
            file_type: "txt".to_string(),
            chunk_index: 0,
            content_preview: content.to_string(),
            content: content.to_string(),
            file_size: 10,
            similarity,
        }
    }

    #[test]
    fn test_tokenize_strips_punctuation() {
        let terms = tokenize("Hello, world! Rust-lang.");
        assert_eq!(terms, vec!["hello", "world", "rust-lang"]);
    }

    #[test]
    fn test_lexical_coverage_full_match() {
        let terms = tokenize("rust programming language");
        let coverage = lexical_coverage(&terms, "I love rust programming and the language itself");
        assert_eq!(coverage, 1.0);
    }

    #[test]
    fn test_lexical_coverage_partial_match() {
        let terms = tokenize("rust programming language");
        let coverage = lexical_coverage(&terms, "rust is great");
        assert!((coverage - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let v = tf_idf_vector("the quick brown fox");
        assert!((cosine_similarity_sparse(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_disjoint_vectors() {
        let a = tf_idf_vector("apples oranges");
        let b = tf_idf_vector("rockets planets");
        assert_eq!(cosine_similarity_sparse(&a, &b), 0.0);
    }

    #[test]
    fn test_direct_prompt_passthrough() {
        assert_eq!(Retriever::direct_prompt("hi"), "hi".to_string());
    }
}
