// Embeddings module
// Client for an OpenAI-compatible embeddings endpoint with batching and retry

pub mod client;

pub use client::{DEFAULT_EMBEDDING_DIMENSION, EmbeddingClient};
