use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{ChunkStrategy, SplitMode};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Default chunk strategy applied to newly created sessions.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_split_mode")]
    pub split_mode: String,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            split_mode: default_split_mode(),
            normalize: default_normalize(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_strategy(&self) -> Result<ChunkStrategy> {
        let split_mode: SplitMode = self.split_mode.parse()?;
        let strategy = ChunkStrategy {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            split_mode,
            normalize: self.normalize,
        };
        strategy.validate()?;
        Ok(strategy)
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    100
}
fn default_split_mode() -> String {
    "paragraph".to_string()
}
fn default_normalize() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dimension: None,
            base_url: default_base_url(),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Index routing settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Base index name; the per-model index is `{base}__{model_key}`.
    #[serde(default = "default_base_index")]
    pub base_index: String,
    /// Batch size for embedding and index writes during commit jobs.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_index: default_base_index(),
            bulk_size: default_bulk_size(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_base_index() -> String {
    "forge-chunks".to_string()
}
fn default_bulk_size() -> usize {
    200
}
fn default_hybrid_alpha() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking defaults against the strategy bounds.
    config
        .chunking
        .to_strategy()
        .with_context(|| "Invalid [chunking] defaults")?;

    // Validate index settings
    if config.index.base_index.is_empty() {
        anyhow::bail!("index.base_index must not be empty");
    }
    if config.index.bulk_size == 0 {
        anyhow::bail!("index.bulk_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.index.hybrid_alpha) {
        anyhow::bail!("index.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dimension.is_none() || config.embedding.dimension == Some(0) {
            anyhow::bail!(
                "embedding.dimension must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let file = write_config(
            r#"[db]
path = "/tmp/forge.sqlite"

[server]
bind = "127.0.0.1:7440"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.split_mode, "paragraph");
        assert_eq!(config.index.base_index, "forge-chunks");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_invalid_chunking_defaults_rejected() {
        let file = write_config(
            r#"[db]
path = "/tmp/forge.sqlite"

[chunking]
chunk_size = 50

[server]
bind = "127.0.0.1:7440"
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dimension() {
        let file = write_config(
            r#"[db]
path = "/tmp/forge.sqlite"

[embedding]
provider = "openai"

[server]
bind = "127.0.0.1:7440"
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let file = write_config(
            r#"[db]
path = "/tmp/forge.sqlite"

[embedding]
provider = "quantum"
model = "m"
dimension = 4

[server]
bind = "127.0.0.1:7440"
"#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
