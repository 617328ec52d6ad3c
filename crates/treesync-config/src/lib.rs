//! Configuration for treesync.
//!
//! Settings come from an optional TOML file and `TREESYNC__*` environment
//! variables, in that order of precedence (environment wins). Nested keys
//! use a double underscore: `TREESYNC__INDEX__BACKEND=qdrant`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding caches, manifests and local indexes
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Units extracted concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Time budget per unit, in seconds
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,

    /// Extensions listed in the tree but never extracted
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,

    /// Apply the root `.gitignore` while scanning
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub splitter: SplitterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_enrichment_model")]
    pub model: String,
    #[serde(default = "default_enrichment_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Local,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: IndexBackend,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("treesync"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_unit_timeout_secs() -> u64 {
    300
}

fn default_binary_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "exe", "dll", "bin"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_enrichment_model() -> String {
    "qwen2.5-coder:latest".to_string()
}

fn default_enrichment_timeout_secs() -> u64 {
    60
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimensions() -> usize {
    768
}

fn default_backend() -> IndexBackend {
    IndexBackend::Local
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_prefix() -> String {
    "treesync_".to_string()
}

fn default_max_chars() -> usize {
    2000
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_enrichment_model(),
            timeout_secs: default_enrichment_timeout_secs(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            qdrant_url: default_qdrant_url(),
            api_key: None,
            collection_prefix: default_collection_prefix(),
        }
    }
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            workers: default_workers(),
            unit_timeout_secs: default_unit_timeout_secs(),
            binary_extensions: default_binary_extensions(),
            respect_gitignore: true,
            enrichment: EnrichmentConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            splitter: SplitterConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or `./treesync.toml` if present) plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, Environment::with_prefix("TREESYNC").separator("__"))
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name("treesync").required(false)),
        };

        let config: Config = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.unit_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "unit_timeout_secs must be at least 1".into(),
            ));
        }
        if self.splitter.max_chars == 0 {
            return Err(ConfigError::Invalid(
                "splitter.max_chars must be at least 1".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment.timeout_secs)
    }
}
