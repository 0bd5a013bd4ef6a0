//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal file only names
//! the database path. Secrets (API keys, access tokens) are read from the
//! environment by the clients that need them and never live in this file.
//!
//! ```toml
//! [db]
//! path = "./data/ba.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [vector]
//! provider = "pinecone"
//! index_name = "ba-agent-documents"
//!
//! [ingest]
//! folder = "./personalauto"
//! lob = "personal_auto"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
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
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
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
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_dims")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_controller_url")]
    pub controller_url: String,
    /// Cap on the `content` metadata field; the index is not a text store.
    #[serde(default = "default_content_preview_chars")]
    pub content_preview_chars: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            index_name: default_index_name(),
            dimension: default_dims(),
            metric: default_metric(),
            cloud: default_cloud(),
            region: default_region(),
            controller_url: default_controller_url(),
            content_preview_chars: default_content_preview_chars(),
            top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl VectorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_vector_provider() -> String {
    "pinecone".to_string()
}
fn default_index_name() -> String {
    "ba-agent-documents".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_controller_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_content_preview_chars() -> usize {
    5000
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    /// File-name globs, matched against entries directly inside `folder`.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_lob")]
    pub lob: String,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    #[serde(default = "default_owner")]
    pub owner: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            include_globs: default_include_globs(),
            lob: default_lob(),
            source_tag: default_source_tag(),
            owner: default_owner(),
        }
    }
}

fn default_folder() -> PathBuf {
    PathBuf::from("personalauto")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.docx".to_string()]
}
fn default_lob() -> String {
    "personal_auto".to_string()
}
fn default_source_tag() -> String {
    "training_data".to_string()
}
fn default_owner() -> String {
    "guest".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default)]
    pub organization_url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            organization_url: None,
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_version() -> String {
    "7.0".to_string()
}

impl Config {
    /// Configuration for an ephemeral database with every external
    /// capability switched off. Used by tests and `--dry-run` tooling.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig {
                provider: "disabled".to_string(),
                ..EmbeddingConfig::default()
            },
            vector: VectorConfig {
                provider: "disabled".to_string(),
                ..VectorConfig::default()
            },
            ingest: IngestConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.provider == "openai" && config.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be specified when provider is 'openai'");
        }
    }

    match config.vector.provider.as_str() {
        "disabled" | "memory" | "pinecone" => {}
        other => anyhow::bail!(
            "Unknown vector provider: '{}'. Must be disabled, memory, or pinecone.",
            other
        ),
    }
    if config.vector.is_enabled() {
        if config.vector.metric != "cosine" {
            anyhow::bail!("vector.metric must be 'cosine'");
        }
        if config.embedding.is_enabled() && config.vector.dimension != config.embedding.dims {
            anyhow::bail!(
                "vector.dimension ({}) must equal embedding.dims ({})",
                config.vector.dimension,
                config.embedding.dims
            );
        }
        if config.vector.top_k == 0 {
            anyhow::bail!("vector.top_k must be >= 1");
        }
    }

    if config.ingest.include_globs.is_empty() {
        anyhow::bail!("ingest.include_globs must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let cfg = parse("[db]\npath = \"./data/ba.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.embedding.dims, 384);
        assert_eq!(cfg.vector.index_name, "ba-agent-documents");
        assert_eq!(cfg.vector.content_preview_chars, 5000);
        assert_eq!(cfg.ingest.lob, "personal_auto");
        assert_eq!(cfg.ingest.include_globs, vec!["*.docx".to_string()]);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_unknown_vector_provider_rejected() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[vector]\nprovider = \"faiss\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown vector provider"));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[embedding]\ndims = 768\n[vector]\ndimension = 384\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must equal embedding.dims"));
    }

    #[test]
    fn test_minimal_config_disables_services() {
        let cfg = Config::minimal("/tmp/x.sqlite");
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.vector.is_enabled());
        assert!(validate(&cfg).is_ok());
    }
}
