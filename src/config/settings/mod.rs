#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::chunker::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSION;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection settings for the OpenAI-compatible embeddings endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL including the API prefix, e.g. `http://localhost:11434/v1`
    pub endpoint: String,
    pub model: String,
    /// Output dimensionality of the embedding model; every collection in the
    /// index is bound to this value
    pub dimension: usize,
    /// Maximum texts per embedding request
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub backoff_ms: u64,
    /// In-flight embedding requests during bulk ingestion
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "nomic-embed-text:latest".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 32,
            timeout_secs: 30,
            retry_attempts: 3,
            backoff_ms: 500,
            concurrency: 3,
        }
    }
}

/// Connection settings for the OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL including the API prefix, e.g. `http://localhost:11434/v1`
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "llama3:latest".to_string(),
            timeout_secs: 120,
            retry_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Retrieval defaults; both can be overridden per query on the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for SearchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.75,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid chunk target size: {0} (must be between 1 and 8192)")]
    InvalidTargetChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than target size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top_k: {0} (must be at least 1)")]
    InvalidTopK(usize),
    #[error("Invalid min score: {0} (must be between -1.0 and 1.0)")]
    InvalidMinScore(f32),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid embedding concurrency: {0} (must be between 1 and 16)")]
    InvalidConcurrency(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load config from `<base_dir>/config.toml`, falling back to defaults
    /// when no file exists yet
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let config_path = base_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                embedding: EmbeddingConfig::default(),
                generation: GenerationConfig::default(),
                chunking: ChunkingConfig::default(),
                search: SearchConfig::default(),
                base_dir: base_dir.as_ref().to_path_buf(),
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = base_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.generation.validate()?;

        if self.chunking.target_size == 0 || self.chunking.target_size > 8192 {
            return Err(ConfigError::InvalidTargetChunkSize(
                self.chunking.target_size,
            ));
        }
        if self.chunking.overlap >= self.chunking.target_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunking.overlap,
                self.chunking.target_size,
            ));
        }

        if self.search.top_k == 0 {
            return Err(ConfigError::InvalidTopK(self.search.top_k));
        }
        if !(-1.0..=1.0).contains(&self.search.min_score) {
            return Err(ConfigError::InvalidMinScore(self.search.min_score));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    /// Directory the vector index persists its collections in
    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.base_dir.join("collections")
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.endpoint)?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if !(64..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }
        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }
        if self.concurrency == 0 || self.concurrency > 16 {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 600 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        Ok(())
    }

    #[inline]
    pub fn endpoint_url(&self) -> crate::Result<Url> {
        Url::parse(&self.endpoint).map_err(|_| {
            crate::RagError::InvalidConfiguration(format!(
                "invalid embedding endpoint URL: {}",
                self.endpoint
            ))
        })
    }
}

impl GenerationConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.endpoint)?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 600 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        Ok(())
    }

    #[inline]
    pub fn endpoint_url(&self) -> crate::Result<Url> {
        Url::parse(&self.endpoint).map_err(|_| {
            crate::RagError::InvalidConfiguration(format!(
                "invalid generation endpoint URL: {}",
                self.endpoint
            ))
        })
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl(endpoint.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(endpoint.to_string()));
    }
    Ok(())
}
