// Configuration management module
// TOML-backed settings for service endpoints, chunking, and search defaults

pub mod settings;

pub use settings::{
    Config, ConfigError, EmbeddingConfig, GenerationConfig, SearchConfig,
};

/// Default base directory for config and index data
#[inline]
pub fn default_base_dir() -> Result<std::path::PathBuf, ConfigError> {
    dirs::data_local_dir()
        .map(|dir| dir.join("ragnarok"))
        .ok_or(ConfigError::DirectoryError)
}
