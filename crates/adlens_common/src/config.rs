//! Configuration for the AdLens daemon.
//!
//! Loads settings from /etc/adlens/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/adlens/config.toml";

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider API base URL (Ollama-compatible)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model used for SQL generation and the final response
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    /// Model used for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Generation request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Embedding request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_secs: u64,

    /// Sampling temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in a generated response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_base() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_generation_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_generation_timeout() -> u64 {
    30
}

fn default_embedding_timeout() -> u64 {
    10
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            generation_model: default_generation_model(),
            embedding_model: default_embedding_model(),
            generation_timeout_secs: default_generation_timeout(),
            embedding_timeout_secs: default_embedding_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Answer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached answers, in hours
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_cache_ttl_hours() -> i64 {
    24
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_cache_ttl_hours(),
        }
    }
}

/// Embedding retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum hits returned by a similarity search
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Similarity floor; hits below this are dropped even inside top-k
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Minimum spacing between embedding provider calls, in milliseconds
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,

    /// Bounded retry count for transient embedding failures
    #[serde(default = "default_embed_max_retries")]
    pub embed_max_retries: u32,

    /// Texts per embedding batch request
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.7
}

fn default_min_call_interval_ms() -> u64 {
    200
}

fn default_embed_max_retries() -> u32 {
    3
}

fn default_embed_batch_size() -> usize {
    16
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            min_call_interval_ms: default_min_call_interval_ms(),
            embed_max_retries: default_embed_max_retries(),
            embed_batch_size: default_embed_batch_size(),
        }
    }
}

/// Context assembly limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum result rows rendered into the prompt
    #[serde(default = "default_max_context_rows")]
    pub max_rows: usize,

    /// Hard cap on the assembled context, in bytes
    #[serde(default = "default_max_context_bytes")]
    pub max_bytes: usize,
}

fn default_max_context_rows() -> usize {
    50
}

fn default_max_context_bytes() -> usize {
    16_384
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_context_rows(),
            max_bytes: default_max_context_bytes(),
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdlensConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub context: ContextConfig,
}

impl AdlensConfig {
    /// Load from the default path, falling back to defaults when absent
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    /// Load from a specific path
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Invalid config at {}: {}. Using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Serialize to TOML (for writing an initial config file)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
