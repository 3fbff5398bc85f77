//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. Secrets are never read from the file: providers look up
//! `OPENAI_API_KEY` in the environment.
//!
//! ```toml
//! [db]
//! path = "./data/docchat.sqlite"
//!
//! [storage]
//! dir = "./data/files"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data/files")
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_window_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            collection: default_collection(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_collection() -> String {
    "documents_embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
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
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
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

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_rewrite_temperature")]
    pub rewrite_temperature: f32,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            rewrite_temperature: default_rewrite_temperature(),
            answer_temperature: default_answer_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_rewrite_temperature() -> f32 {
    0.0
}
fn default_answer_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Cap on stored messages per conversation.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Messages the rewriter sees.
    #[serde(default = "default_window")]
    pub rewrite_window: usize,
    /// Messages the answer generator sees.
    #[serde(default = "default_window")]
    pub history_window: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            rewrite_window: default_window(),
            history_window: default_window(),
            list_limit: default_list_limit(),
        }
    }
}

fn default_max_messages() -> usize {
    10
}
fn default_window() -> usize {
    4
}
fn default_list_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct SentimentConfig {
    /// `lexicon`, `llm`, or `disabled`.
    #[serde(default = "default_sentiment_provider")]
    pub provider: String,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            provider: default_sentiment_provider(),
        }
    }
}

fn default_sentiment_provider() -> String {
    "lexicon".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Empty means any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_disabled() -> String {
    "disabled".to_string()
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

impl Config {
    /// Configuration with every default and an on-disk database under
    /// `./data`. Used by tests and when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/docchat.sqlite"),
            },
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            conversation: ConversationConfig::default(),
            sentiment: SentimentConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.window_chars == 0 {
            anyhow::bail!("chunking.window_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.window_chars {
            anyhow::bail!(
                "chunking.overlap_chars ({}) must be smaller than chunking.window_chars ({})",
                self.chunking.overlap_chars,
                self.chunking.window_chars
            );
        }

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.collection.trim().is_empty() {
            anyhow::bail!("retrieval.collection must not be empty");
        }

        if self.conversation.max_messages == 0 {
            anyhow::bail!("conversation.max_messages must be >= 1");
        }
        if self.conversation.list_limit == 0 {
            anyhow::bail!("conversation.list_limit must be >= 1");
        }

        if self.storage.max_upload_bytes == 0 {
            anyhow::bail!("storage.max_upload_bytes must be > 0");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.batch_size == 0 {
                anyhow::bail!("embedding.batch_size must be > 0");
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        for (name, t) in [
            ("llm.rewrite_temperature", self.llm.rewrite_temperature),
            ("llm.answer_temperature", self.llm.answer_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("{} must be in [0.0, 2.0]", name);
            }
        }

        match self.sentiment.provider.as_str() {
            "disabled" | "lexicon" | "llm" => {}
            other => anyhow::bail!(
                "Unknown sentiment provider: '{}'. Must be disabled, lexicon, or llm.",
                other
            ),
        }
        if self.sentiment.provider == "llm" && !self.llm.is_enabled() {
            anyhow::bail!("sentiment.provider = \"llm\" requires an enabled [llm] provider");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
