//! TOML configuration.
//!
//! Every section has defaults, so an empty or missing file is a valid
//! configuration. After parsing, `DATA_DIR`, `VECTORSTORE_DIR`,
//! `LLM_NAME` and `EMBEDDING_NAME` override the matching fields.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Files larger than this are not handed to the document reader.
pub const DEFAULT_MAX_EXTRACT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub canon: CanonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_abbreviations")]
    pub abbreviations: PathBuf,
    #[serde(default = "default_abbreviation_rules")]
    pub abbreviation_rules: PathBuf,
    #[serde(default = "default_schema")]
    pub schema: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist_dir: default_persist_dir(),
            abbreviations: default_abbreviations(),
            abbreviation_rules: default_abbreviation_rules(),
            schema: default_schema(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_persist_dir() -> PathBuf {
    PathBuf::from("./vectorstore")
}
fn default_abbreviations() -> PathBuf {
    PathBuf::from("./abreviations/abreviations.json")
}
fn default_abbreviation_rules() -> PathBuf {
    PathBuf::from("./abreviations/abreviations_regex.json")
}
fn default_schema() -> PathBuf {
    PathBuf::from("./ontology/schemas.toml")
}

/// Model identifiers forwarded to the index back end.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_llm_name")]
    pub llm_name: String,
    #[serde(default = "default_embedding_name")]
    pub embedding_name: String,
    #[serde(default = "default_llm_num_ctx")]
    pub llm_num_ctx: u32,
    #[serde(default)]
    pub embedding_num_gpu: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            llm_name: default_llm_name(),
            embedding_name: default_embedding_name(),
            llm_num_ctx: default_llm_num_ctx(),
            embedding_num_gpu: None,
        }
    }
}

fn default_llm_name() -> String {
    "mistral".to_string()
}
fn default_embedding_name() -> String {
    "nomic-embed-text".to_string()
}
fn default_llm_num_ctx() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    150
}

/// Batch sizing: about `target_batches` batches per run, never more than
/// `max_batch_size` records each.
#[derive(Debug, Deserialize, Clone)]
pub struct BatchingConfig {
    #[serde(default = "default_target_batches")]
    pub target_batches: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            target_batches: default_target_batches(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_target_batches() -> usize {
    10
}
fn default_max_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_extract_bytes: DEFAULT_MAX_EXTRACT_BYTES,
        }
    }
}

fn default_max_extract_bytes() -> u64 {
    DEFAULT_MAX_EXTRACT_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct CanonConfig {
    /// Named schemas of the schema file whose rules apply, in order.
    #[serde(default = "default_schemas")]
    pub schemas: Vec<String>,
}

impl Default for CanonConfig {
    fn default() -> Self {
        Self {
            schemas: default_schemas(),
        }
    }
}

fn default_schemas() -> Vec<String> {
    vec!["generic_record".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load `path`, falling back to defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        Config::default()
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Apply environment overrides. `lookup` is injectable for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATA_DIR") {
            self.paths.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VECTORSTORE_DIR") {
            self.paths.persist_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LLM_NAME") {
            self.model.llm_name = v;
        }
        if let Some(v) = lookup("EMBEDDING_NAME") {
            self.model.embedding_name = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.batching.target_batches == 0 {
            anyhow::bail!("batching.target_batches must be >= 1");
        }
        if self.batching.max_batch_size == 0 {
            anyhow::bail!("batching.max_batch_size must be >= 1");
        }
        Ok(())
    }
}
