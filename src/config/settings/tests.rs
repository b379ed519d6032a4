use super::*;
use tempfile::TempDir;

fn default_config(base_dir: &Path) -> Config {
    Config {
        embedding: EmbeddingConfig::default(),
        generation: GenerationConfig::default(),
        chunking: ChunkingConfig::default(),
        search: SearchConfig::default(),
        base_dir: base_dir.to_path_buf(),
    }
}

#[test]
fn defaults_are_valid() {
    let dir = TempDir::new().expect("tempdir");
    let config = default_config(dir.path());
    assert!(config.validate().is_ok());

    assert_eq!(config.chunking.target_size, 512);
    assert_eq!(config.chunking.overlap, 50);
    assert_eq!(config.search.top_k, 5);
    assert!((config.search.min_score - 0.75).abs() < f32::EPSILON);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().expect("tempdir");

    let config = Config::load(dir.path()).expect("load should succeed");

    assert_eq!(config, default_config(dir.path()));
    assert_eq!(config.index_path(), dir.path().join("collections"));
}

#[test]
fn save_then_load_round_trips() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = default_config(dir.path());
    config.embedding.model = "custom-embed".to_string();
    config.chunking.target_size = 256;
    config.chunking.overlap = 32;
    config.search.min_score = 0.5;

    config.save().expect("save should succeed");
    let loaded = Config::load(dir.path()).expect("load should succeed");

    assert_eq!(loaded, config);
}

#[test]
fn partial_file_uses_defaults_for_the_rest() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("config.toml"),
        "[chunking]\ntarget_size = 128\n",
    )
    .expect("write should succeed");

    let config = Config::load(dir.path()).expect("load should succeed");

    assert_eq!(config.chunking.target_size, 128);
    assert_eq!(config.chunking.overlap, 50);
    assert_eq!(config.embedding.model, "nomic-embed-text:latest");
}

#[test]
fn invalid_values_are_rejected() {
    let dir = TempDir::new().expect("tempdir");

    let mut config = default_config(dir.path());
    config.chunking.overlap = config.chunking.target_size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(_, _))
    ));

    let mut config = default_config(dir.path());
    config.embedding.dimension = 1;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(1))
    ));

    let mut config = default_config(dir.path());
    config.embedding.endpoint = "ftp://example.com".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

    let mut config = default_config(dir.path());
    config.search.min_score = 1.5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidMinScore(_))
    ));

    let mut config = default_config(dir.path());
    config.generation.model = "  ".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));
}

#[test]
fn invalid_file_fails_to_load() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("config.toml"),
        "[search]\ntop_k = 0\n",
    )
    .expect("write should succeed");

    assert!(Config::load(dir.path()).is_err());
}
