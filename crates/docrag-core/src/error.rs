use thiserror::Error;

/// Failures surfaced by the engine.
///
/// Ingestion recovers from per-chunk [`EngineError::Embedding`] failures
/// locally; the other variants reach the caller as values.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("extraction failed for {name}: {reason}")]
    Extraction { name: String, reason: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("retrieval unavailable: {0}")]
    StoreUnavailable(String),

    #[error("query failed: {0}")]
    QueryFailure(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document {name} is {state}, cannot {action}")]
    InvalidState {
        name: String,
        state: crate::models::IndexState,
        action: &'static str,
    },

    #[error("indexing failed for {name}: {reason}")]
    Indexing { name: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
