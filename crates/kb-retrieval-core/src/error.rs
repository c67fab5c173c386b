//! Error taxonomy for the retrieval pipeline.
//!
//! Failures local to one chunk or one candidate are absorbed by the
//! orchestrator and only logged; the variants that reach callers are the
//! ones that would otherwise corrupt persisted state or indicate a bad
//! request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// `size == 0` or `overlap >= size`. Rejected before any work begins.
    #[error("invalid chunk config: {0}")]
    InvalidChunkConfig(String),

    /// The embedding model could not be loaded. Not retried automatically.
    #[error("embedding model failed to initialize: {0}")]
    ModelInitializationFailure(String),

    /// A single text could not be embedded.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// A vector's length disagrees with the expected dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The atomic replace-for-document write failed; nothing was committed.
    #[error("storage transaction failed: {0}")]
    StorageTransactionFailure(String),

    /// A read-side store operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown knowledge base: {0}")]
    UnknownKnowledgeBase(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl RetrievalError {
    /// Flatten an `anyhow` chain from a store backend into a read error.
    pub fn storage(err: anyhow::Error) -> Self {
        RetrievalError::Storage(format!("{:#}", err))
    }
}
