
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::net::{RetryPolicy, request_with_retry};
use crate::{RagError, Result};

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// Client for an OpenAI-compatible embeddings endpoint.
///
/// Inputs are embedded in batches of at most `batch_size` texts; batches are
/// sent sequentially and results concatenated, so the output always has one
/// vector per input text in input order. Transient failures are retried with
/// exponential backoff; once the budget is spent the whole call fails rather
/// than returning a partial result.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    endpoint: Url,
    model: String,
    batch_size: usize,
    dimension: usize,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            batch_size: config.batch_size,
            dimension: config.dimension,
            agent: crate::net::agent_with_timeout(Duration::from_secs(config.timeout_secs)),
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                backoff: Duration::from_millis(config.backoff_ms),
            },
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = crate::net::agent_with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry = RetryPolicy { attempts, backoff };
        self
    }

    /// Output dimensionality this client is configured for
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Check that the endpoint is reachable and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self.api_url("models")?;
        debug!("Checking embedding service at {}", url);

        let body = request_with_retry(&self.retry, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| RagError::EmbeddingServiceUnavailable {
            attempts: e.attempts,
            batches: Vec::new(),
            message: e.message,
        })?;

        let models: ModelsResponse =
            serde_json::from_str(&body).context("Failed to parse models response")?;

        if models.data.iter().any(|m| m.id == self.model) {
            info!("Embedding service healthy, model {} available", self.model);
            Ok(())
        } else {
            let available: Vec<&str> = models.data.iter().map(|m| m.id.as_str()).collect();
            Err(RagError::InvalidConfiguration(format!(
                "embedding model '{}' is not served at {} (available: {:?})",
                self.model, self.endpoint, available
            )))
        }
    }

    /// Embed every text in `texts`, in order.
    ///
    /// Empty strings are embedded like any other input; callers that want to
    /// skip blank chunks must filter before calling.
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts", texts.len());

        let batch_count = texts.len().div_ceil(self.batch_size);
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = self.embed_batch(batch).map_err(|e| {
                error!(
                    "Embedding batch {}/{} failed: {}",
                    batch_index + 1,
                    batch_count,
                    e
                );
                match e {
                    RagError::EmbeddingServiceUnavailable {
                        attempts, message, ..
                    } => RagError::EmbeddingServiceUnavailable {
                        attempts,
                        // Everything from the failed batch onward was never
                        // embedded; name all of it, not just the first batch.
                        batches: (batch_index..batch_count).collect(),
                        message,
                    },
                    other => other,
                }
            })?;
            vectors.extend(batch_vectors);
        }

        debug!("Embedded {} texts in {} batches", texts.len(), batch_count);
        Ok(vectors)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.api_url("embeddings")?;
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embeddings request")?;

        let body = request_with_retry(&self.retry, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| RagError::EmbeddingServiceUnavailable {
            attempts: e.attempts,
            batches: Vec::new(),
            message: e.message,
        })?;

        let mut response: EmbeddingsResponse =
            serde_json::from_str(&body).context("Failed to parse embeddings response")?;

        if response.data.len() != texts.len() {
            return Err(RagError::Other(anyhow!(
                "embedding count mismatch: sent {} texts, received {} vectors",
                texts.len(),
                response.data.len()
            )));
        }

        // The endpoint echoes input positions; order by them rather than
        // trusting response order.
        response.data.sort_by_key(|entry| entry.index);

        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|_| RagError::InvalidConfiguration(format!("invalid endpoint URL: {joined}")))
    }
}
