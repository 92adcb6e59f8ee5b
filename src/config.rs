use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory where uploaded originals are kept as `<doc_id><ext>`.
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/uploads"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Base URL of the vector store HTTP API, e.g. `http://localhost:19530`.
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// IVF cluster count used when the index is first created.
    #[serde(default = "default_nlist")]
    pub nlist: u32,
    /// Query-time candidate-list size.
    #[serde(default = "default_nprobe")]
    pub nprobe: u32,
    /// Bounded connection attempts with fixed backoff; exhaustion is fatal.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_secs")]
    pub connect_backoff_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "document_chunks".to_string()
}
fn default_nlist() -> u32 {
    128
}
fn default_nprobe() -> u32 {
    10
}
fn default_connect_attempts() -> u32 {
    10
}
fn default_connect_backoff_secs() -> u64 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Embedding service endpoint, e.g. `http://localhost:8080/embed`.
    pub url: String,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    1200
}
fn default_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

/// Reranker selection, fixed at construction: disabled, local strategy, or a
/// remote scoring endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `disabled`, `local`, or `remote`.
    #[serde(default = "default_rerank_mode")]
    pub mode: String,
    /// Local strategy: `lexical`, `crossencoder`, or `hybrid`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Cross-encoder inference endpoint (local crossencoder/hybrid).
    #[serde(default)]
    pub scorer_url: Option<String>,
    /// Remote reranker endpoint (`mode = "remote"`).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            mode: default_rerank_mode(),
            strategy: default_strategy(),
            scorer_url: None,
            endpoint: None,
            alpha: default_alpha(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_mode() -> String {
    "disabled".to_string()
}
fn default_strategy() -> String {
    "lexical".to_string()
}
fn default_alpha() -> f32 {
    0.8
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap must be < chunking.max_chars");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.vector.connect_attempts == 0 {
        anyhow::bail!("vector.connect_attempts must be >= 1");
    }

    match config.rerank.mode.as_str() {
        "disabled" => {}
        "local" => match config.rerank.strategy.as_str() {
            "lexical" => {}
            "crossencoder" | "hybrid" => {
                if config.rerank.scorer_url.is_none() {
                    anyhow::bail!(
                        "rerank.scorer_url must be set for strategy '{}'",
                        config.rerank.strategy
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown rerank strategy: '{}'. Must be lexical, crossencoder, or hybrid.",
                other
            ),
        },
        "remote" => {
            if config.rerank.endpoint.is_none() {
                anyhow::bail!("rerank.endpoint must be set when rerank.mode is 'remote'");
            }
        }
        other => anyhow::bail!(
            "Unknown rerank mode: '{}'. Must be disabled, local, or remote.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.rerank.alpha) {
        anyhow::bail!("rerank.alpha must be in [0.0, 1.0]");
    }

    Ok(config)
}
