//! WhereSpace: self-hosted retrieval-augmented generation engine
//!
//! Ingests a local document corpus (PDF, DOCX, plain text and markup
//! files), embeds and indexes it in Postgres/pgvector, and serves
//! streamed, citation-backed chat completions from a local model server
//! over an HTTP facade.
//!
//! # Example
//!
//! ```rust,no_run
//! use wherespace::config::Config;
//! use wherespace::vector_store::VectorStoreAdapter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = VectorStoreAdapter::connect(&config.store, config.model_server.embedding_dim).await?;
//!     store.init_schema(false).await?;
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod embedding_batcher;
pub mod error;
pub mod extractor;
pub mod http;
pub mod ingestion;
pub mod model_catalog;
pub mod model_client;
pub mod model_state;
pub mod query_cache;
pub mod retriever;
pub mod scanner;
pub mod vector_store;

pub use config::Config;
pub use error::{Result, WhereSpaceError};
pub use http::{create_router, AppState};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
