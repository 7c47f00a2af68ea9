//! Process configuration, layered defaults -> file -> environment
//!
//! Built once at startup (see `bin/wherespace_server.rs`) and passed around
//! behind an `Arc`; nothing here is a global.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the whole pipeline (§6.5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub model_server: ModelServerConfig,
    pub chunking: ChunkingConfig,
    pub ingestion: IngestionConfig,
    pub retrieval: RetrievalConfig,
    pub http: HttpConfig,
    pub model_state: ModelStateConfig,
}

/// Vector store connection (C1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

impl StoreConfig {
    /// Postgres connection string built from the discrete fields
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "vectordb".to_string(),
            db_user: "postgres".to_string(),
            db_password: String::new(),
            pool_min: 2,
            pool_max: 10,
        }
    }
}

/// Model server wire contract (C2, §6.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelServerConfig {
    pub model_server_url: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub embed_timeout_secs: u64,
    pub chat_idle_timeout_secs: u64,
    pub tags_timeout_secs: u64,
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            model_server_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dim: 768,
            embed_timeout_secs: 60,
            chat_idle_timeout_secs: 30,
            tags_timeout_secs: 5,
        }
    }
}

/// Chunker parameters (C4, §4.4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 100,
        }
    }
}

/// Ingestion coordinator + embedding batcher parallelism (C5/C6)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub max_workers_extract: usize,
    pub max_workers_embed: usize,
    pub embed_batch_size: usize,
    pub max_document_size_bytes: u64,
    pub max_documents_per_run: usize,
    pub skip_existing: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_workers_extract: (num_cpus::get().saturating_sub(1)).max(1),
            max_workers_embed: 4,
            embed_batch_size: 20,
            max_document_size_bytes: 10 * 1024 * 1024,
            max_documents_per_run: 50,
            skip_existing: true,
        }
    }
}

/// Retriever + query cache parameters (C7/C8)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_similarity: f32,
    pub max_prompt_tokens: usize,
    pub query_cache_size: usize,
    pub query_cache_ttl_sec: i64,
    pub near_duplicate_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_similarity: 0.3,
            max_prompt_tokens: 2000,
            query_cache_size: 1000,
            query_cache_ttl_sec: 300,
            near_duplicate_threshold: 0.95,
        }
    }
}

/// HTTP facade bind address (C10)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub http_host: String,
    pub http_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 5000,
        }
    }
}

/// Durable model-selection state (C9)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStateConfig {
    pub state_path: String,
    pub default_model: String,
}

impl Default for ModelStateConfig {
    fn default() -> Self {
        Self {
            state_path: "model_state.json".to_string(),
            default_model: "llama3.1".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            model_server: ModelServerConfig::default(),
            chunking: ChunkingConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            http: HttpConfig::default(),
            model_state: ModelStateConfig::default(),
        }
    }
}

impl Config {
    /// Layer defaults -> optional `wherespace.toml` -> `WHERESPACE_*` env vars
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("wherespace").required(false))
            .add_source(
                config::Environment::with_prefix("WHERESPACE")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg: Config = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.chunking.chunk_size, 512);
        assert_eq!(cfg.chunking.chunk_overlap, 100);
        assert_eq!(cfg.retrieval.top_k, 10);
        assert_eq!(cfg.model_server.embedding_dim, 768);
        assert_eq!(cfg.store.pool_min, 2);
        assert_eq!(cfg.store.pool_max, 10);
        assert_eq!(cfg.ingestion.max_documents_per_run, 50);
    }

    #[test]
    fn test_connection_string() {
        let store = StoreConfig::default();
        assert_eq!(
            store.connection_string(),
            "postgres://postgres:@localhost:5432/vectordb"
        );
    }

    #[test]
    fn test_from_env_without_file_uses_defaults() {
        let cfg = Config::from_env().expect("config should build from defaults alone");
        assert_eq!(cfg.http.http_port, 5000);
    }
}
