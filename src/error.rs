//! Error taxonomy for the ingestion + retrieval + generation pipeline

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, WhereSpaceError>;

/// Top-level error type; each variant maps to one HTTP status in the facade
#[derive(Error, Debug)]
pub enum WhereSpaceError {
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] ignore::Error),
}

/// Errors raised by the text extractor (C3); absorbed, never abort ingestion
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("file too large: {0} bytes")]
    TooLarge(u64),

    #[error("parser failure for {path}: {reason}")]
    ParserFailed { path: String, reason: String },

    #[error("extracted content too short ({len} chars)")]
    TooShort { len: usize },
}

/// Errors raised by the model server client (C2) and embedding batcher (C5)
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("non-2xx response ({status}): {body}")]
    BadResponse { status: u16, body: String },

    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

/// Errors raised by the vector store adapter (C1)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection failed after retries: {0}")]
    ConnectionFailed(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("schema dimension mismatch: table has {table_dim}, configured {configured_dim}")]
    DimensionMismatch {
        table_dim: usize,
        configured_dim: usize,
    },
}

impl WhereSpaceError {
    /// Whether the failure is worth a bounded retry (transient I/O, or a
    /// 5xx from the model server, but never a 4xx or a logic error; §4.2)
    pub fn is_retryable(&self) -> bool {
        match self {
            WhereSpaceError::Embedding(EmbeddingError::Timeout)
            | WhereSpaceError::Embedding(EmbeddingError::ConnectionFailed(_))
            | WhereSpaceError::Storage(StorageError::ConnectionFailed(_))
            | WhereSpaceError::Http(_) => true,
            WhereSpaceError::Embedding(EmbeddingError::BadResponse { status, .. }) => *status >= 500,
            _ => false,
        }
    }

    /// Error category for logging/metrics and the JSON error body's `kind`
    pub fn category(&self) -> &'static str {
        match self {
            WhereSpaceError::Extraction(_) => "extraction",
            WhereSpaceError::Embedding(_) => "embedding",
            WhereSpaceError::Storage(_) => "storage",
            WhereSpaceError::SchemaMismatch(_) => "schema_mismatch",
            WhereSpaceError::ModelNotFound(_) => "model_not_found",
            WhereSpaceError::Validation(_) => "validation",
            WhereSpaceError::Cancelled => "cancelled",
            WhereSpaceError::Internal(_) => "internal",
            WhereSpaceError::Io(_) => "io",
            WhereSpaceError::Serialization(_) => "serialization",
            WhereSpaceError::Http(_) => "http",
            WhereSpaceError::Database(_) => "database",
            WhereSpaceError::Walk(_) => "walk",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(WhereSpaceError::Embedding(EmbeddingError::Timeout).is_retryable());
        assert!(!WhereSpaceError::Validation("bad input".into()).is_retryable());
    }

    #[test]
    fn test_category() {
        assert_eq!(WhereSpaceError::Cancelled.category(), "cancelled");
        assert_eq!(
            WhereSpaceError::ModelNotFound("mistral".into()).category(),
            "model_not_found"
        );
    }
}
