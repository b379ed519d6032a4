use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Crate-wide error taxonomy.
///
/// Transient service failures are retried by the client that owns the retry
/// budget; the variants here are what callers see once that budget is spent.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "Embedding service unavailable after {attempts} attempts (unprocessed batches {batches:?}): {message}"
    )]
    EmbeddingServiceUnavailable {
        attempts: u32,
        /// Ordinals of the batches that were not successfully embedded,
        /// starting with the batch that exhausted the retry budget.
        batches: Vec<usize>,
        message: String,
    },

    #[error("Generation service unavailable after {attempts} attempts: {message}")]
    GenerationServiceUnavailable { attempts: u32, message: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Storage error during {operation} on collection '{collection}': {message}")]
    StorageIo {
        collection: String,
        operation: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chunker;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod generation;
pub mod index;
pub(crate) mod net;
pub mod pipeline;
