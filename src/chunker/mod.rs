
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

/// A bounded contiguous slice of a source document, sized for embedding.
///
/// Identity is `source_document` plus `sequence_number`; chunking the same
/// text with the same parameters always reproduces the same ids, which is
/// what makes re-ingestion an upsert rather than a duplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, `<source_document>#<sequence_number>`
    pub id: String,
    /// Identifier of the document this chunk was cut from
    pub source_document: String,
    /// Position of this chunk in the document's chunk sequence, from 0
    pub sequence_number: usize,
    /// The chunk text, an exact byte slice of the source text
    pub text: String,
    /// Number of whitespace-delimited tokens in `text`
    pub token_count: usize,
}

/// Configuration for the token-window chunker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in whitespace-delimited tokens
    pub target_size: usize,
    /// Tokens shared between adjacent windows; must be less than `target_size`
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_size: 512,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk target size must be at least 1 token".to_string(),
            ));
        }
        if self.overlap >= self.target_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than target size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

/// Byte span of a single token within the source text
#[derive(Debug, Clone, Copy)]
struct TokenSpan {
    start: usize,
    end: usize,
}

/// Split `text` into overlapping token windows.
///
/// The window start advances by `target_size - overlap` tokens per step, so
/// every token belongs to at least one chunk and the trailing window is
/// emitted even when it is shorter than `target_size`. Chunk text is taken
/// as a byte slice of the original input, so no whitespace inside a chunk is
/// rewritten. Empty or whitespace-only input yields an empty sequence.
#[inline]
pub fn chunk_text(source_document: &str, text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let spans = tokenize(text);
    if spans.is_empty() {
        return Ok(Vec::new());
    }

    let step = config.target_size - config.overlap;
    let mut chunks = Vec::with_capacity(spans.len().div_ceil(step));
    let mut start = 0;

    loop {
        let end = (start + config.target_size).min(spans.len());
        let slice = text
            .get(spans[start].start..spans[end - 1].end)
            .expect("token spans are valid char boundaries");

        let sequence_number = chunks.len();
        chunks.push(Chunk {
            id: chunk_id(source_document, sequence_number),
            source_document: source_document.to_string(),
            sequence_number,
            text: slice.to_string(),
            token_count: end - start,
        });

        if end == spans.len() {
            break;
        }
        start += step;
    }

    debug!(
        "Chunked '{}' into {} chunks ({} tokens, window {}/{})",
        source_document,
        chunks.len(),
        spans.len(),
        config.target_size,
        config.overlap
    );

    Ok(chunks)
}

/// Stable chunk identifier, shared with the index's upsert keying
#[inline]
pub fn chunk_id(source_document: &str, sequence_number: usize) -> String {
    format!("{}#{}", source_document, sequence_number)
}

/// Count whitespace-delimited tokens in `text`
#[inline]
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn tokenize(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut start = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push(TokenSpan { start: s, end: i });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push(TokenSpan {
            start: s,
            end: text.len(),
        });
    }

    spans
}
