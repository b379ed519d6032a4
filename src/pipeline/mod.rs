#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, anyhow};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::chunker::{Chunk, ChunkingConfig, chunk_text};
use crate::embeddings::EmbeddingClient;
use crate::generation::{ChatMessage, GenerationClient};
use crate::index::{IndexRecord, RetrievalResult, VectorIndex, WriteMode};
use crate::{RagError, Result};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the question using only the \
provided context. If the context does not contain the answer, say that you do not know.";

/// A document ready for ingestion: already-extracted plain text plus the
/// identifier chunk ids are derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub text: String,
}

/// Outcome of ingesting a single document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source: String,
    pub chunks_written: usize,
}

/// Outcome of a bulk ingestion; one document's failure does not abort the
/// rest of the batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<IngestReport>,
    pub failed: Vec<(String, RagError)>,
    /// Documents never started because the batch was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

/// Query plus retrieved context, assembled deterministically and ready to
/// hand to the generation service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedPrompt {
    /// Retrieved chunk texts in descending score order
    pub context: Vec<String>,
    pub query: String,
}

impl AugmentedPrompt {
    /// Render the user-turn text of the prompt
    #[inline]
    pub fn render(&self) -> String {
        if self.context.is_empty() {
            return format!(
                "No relevant context was found for this question.\n\nQuestion: {}",
                self.query
            );
        }

        let blocks: Vec<String> = self
            .context
            .iter()
            .enumerate()
            .map(|(i, passage)| format!("[{}] {}", i + 1, passage))
            .collect();
        format!(
            "Context:\n\n{}\n\nQuestion: {}",
            blocks.join("\n\n"),
            self.query
        )
    }

    /// The prompt as a chat message list for the generation service
    #[inline]
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.render()),
        ]
    }
}

/// Cooperative cancellation flag for bulk ingestion; cancellation takes
/// effect between documents, never in the middle of one
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Coordinates the chunker, the embedding client, and the vector index.
///
/// Ingestion is transactional at document granularity: all of a document's
/// embeddings are buffered before the first upsert, so a mid-document
/// embedding failure commits nothing. Holds its collaborators explicitly
/// rather than resolving them from shared process state.
pub struct Orchestrator {
    embedder: Arc<EmbeddingClient>,
    index: Arc<VectorIndex>,
    chunking: ChunkingConfig,
    embed_concurrency: usize,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        index: Arc<VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
            embed_concurrency: 3,
        }
    }

    /// Bound on concurrently embedding documents during bulk ingestion
    #[inline]
    pub fn with_embed_concurrency(mut self, concurrency: usize) -> Self {
        self.embed_concurrency = concurrency.max(1);
        self
    }

    /// Chunk, embed, and upsert one document into `collection`.
    ///
    /// Re-ingesting the same text with the same chunking parameters produces
    /// the same chunk ids and therefore replaces records instead of
    /// duplicating them.
    #[inline]
    pub async fn ingest_document(
        &self,
        source_id: &str,
        text: &str,
        collection: &str,
    ) -> Result<IngestReport> {
        let chunks = chunk_text(source_id, text, &self.chunking)?;
        if chunks.is_empty() {
            debug!("Document '{}' produced no chunks", source_id);
            return Ok(IngestReport {
                source: source_id.to_string(),
                chunks_written: 0,
            });
        }

        info!(
            "Ingesting '{}' into '{}' ({} chunks)",
            source_id,
            collection,
            chunks.len()
        );

        let records = embed_chunks_with(&self.embedder, chunks).await?;
        let summary = self
            .index
            .upsert(collection, records, WriteMode::AutoCreate)
            .await?;

        Ok(IngestReport {
            source: source_id.to_string(),
            chunks_written: summary.written(),
        })
    }

    /// Ingest many documents, overlapping their embedding work up to the
    /// configured concurrency bound.
    ///
    /// Each document succeeds or fails on its own; failures are reported per
    /// document rather than aborting the batch. When `cancel` fires,
    /// documents already being processed run to completion and the rest are
    /// skipped.
    #[inline]
    pub async fn ingest_batch(
        &self,
        documents: Vec<SourceDocument>,
        collection: &str,
        cancel: &CancelFlag,
    ) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.embed_concurrency));
        let mut report = BatchReport::default();
        let mut tasks = Vec::new();

        for document in documents {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.skipped += 1;
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let embedder = Arc::clone(&self.embedder);
            let index = Arc::clone(&self.index);
            let chunking = self.chunking;
            let collection = collection.to_string();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("ingest semaphore is never closed");

                // A cancel raised while this document waited for a slot means
                // it never started; skip it instead of racing the flag.
                if cancel.is_cancelled() {
                    return (document.id, Ok(None));
                }

                let result =
                    ingest_one(&embedder, &index, &chunking, &collection, &document).await;
                (document.id, result.map(Some))
            }));
        }

        for task in tasks {
            match task.await {
                Ok((_, Ok(Some(ingest)))) => report.succeeded.push(ingest),
                Ok((_, Ok(None))) => {
                    report.cancelled = true;
                    report.skipped += 1;
                }
                Ok((source, Err(e))) => {
                    error!("Failed to ingest '{}': {}", source, e);
                    report.failed.push((source, e));
                }
                Err(join_error) => {
                    error!("Ingestion task panicked: {}", join_error);
                    report.failed.push((
                        "<unknown>".to_string(),
                        RagError::Other(anyhow!("ingestion task panicked: {join_error}")),
                    ));
                }
            }
        }

        info!(
            "Batch ingestion finished: {} succeeded, {} failed, {} skipped",
            report.succeeded.len(),
            report.failed.len(),
            report.skipped
        );
        report
    }

    /// Embed the query and rank matching chunks from `collection`
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>> {
        let embedder = Arc::clone(&self.embedder);
        let query_text = query.to_string();

        let mut vectors = tokio::task::spawn_blocking(move || embedder.embed(&[query_text]))
            .await
            .context("query embedding task failed")??;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| RagError::Other(anyhow!("embedding service returned no query vector")))?;

        self.index
            .search(collection, &query_vector, top_k, min_score)
            .await
    }

    /// Retrieve context for `query` and assemble the augmented prompt.
    ///
    /// Zero retrieved results is not an error; the prompt then carries an
    /// explicit no-context marker so the generator can answer gracefully.
    #[inline]
    pub async fn answer_query(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<AugmentedPrompt> {
        let results = self.retrieve(query, collection, top_k, min_score).await?;

        if results.is_empty() {
            warn!(
                "No context above score {} found in '{}' for query",
                min_score, collection
            );
        }

        Ok(AugmentedPrompt {
            context: results.into_iter().map(|r| r.chunk.text).collect(),
            query: query.to_string(),
        })
    }

    /// Full question answering: assemble the augmented prompt and return the
    /// generation service's answer unmodified.
    #[inline]
    pub async fn ask(
        &self,
        generator: &GenerationClient,
        query: &str,
        collection: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<String> {
        let prompt = self.answer_query(query, collection, top_k, min_score).await?;
        let messages = prompt.to_messages();

        let generator = generator.clone();
        tokio::task::spawn_blocking(move || generator.complete(&messages))
            .await
            .context("generation task failed")?
    }
}

async fn ingest_one(
    embedder: &Arc<EmbeddingClient>,
    index: &Arc<VectorIndex>,
    chunking: &ChunkingConfig,
    collection: &str,
    document: &SourceDocument,
) -> Result<IngestReport> {
    let chunks = chunk_text(&document.id, &document.text, chunking)?;
    if chunks.is_empty() {
        return Ok(IngestReport {
            source: document.id.clone(),
            chunks_written: 0,
        });
    }

    let records = embed_chunks_with(embedder, chunks).await?;
    let summary = index
        .upsert(collection, records, WriteMode::AutoCreate)
        .await?;

    Ok(IngestReport {
        source: document.id.clone(),
        chunks_written: summary.written(),
    })
}

/// Embed a whole document's chunks, buffering every vector before any record
/// is produced. The blocking HTTP client runs off the async runtime.
async fn embed_chunks_with(
    embedder: &Arc<EmbeddingClient>,
    chunks: Vec<Chunk>,
) -> Result<Vec<IndexRecord>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let embedder = Arc::clone(embedder);
    let vectors = tokio::task::spawn_blocking(move || embedder.embed(&texts))
        .await
        .context("embedding task failed")??;

    if vectors.len() != chunks.len() {
        return Err(RagError::Other(anyhow!(
            "embedding count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }

    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexRecord { chunk, vector })
        .collect())
}
