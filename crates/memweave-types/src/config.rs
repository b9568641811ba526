//! Pipeline configuration types for memweave.
//!
//! `PipelineConfig` represents the `memweave.toml` file. Every field has a
//! default, so an empty or missing file yields a usable configuration.
//! API keys never live here; they come from the environment.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::run::ReconcileMode;

/// Upper bound on worker pool width.
pub const MAX_WORKERS: usize = 64;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub judgment: JudgmentConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Judgment service (chat completion) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentConfig {
    /// Provider label used in logs and spans.
    #[serde(default = "default_provider_name")]
    pub provider: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_judgment_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_judgment_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for JudgmentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_name(),
            base_url: default_openai_base_url(),
            model: default_judgment_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
        }
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    OpenAi,
    FastEmbed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Falls back to the judgment base URL when unset.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            base_url: None,
        }
    }
}

/// Which vector store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Lance,
    Qdrant,
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Lance => write!(f, "lance"),
            StoreBackend::Qdrant => write!(f, "qdrant"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// LanceDB directory. Defaults to `~/.memweave/vector_store`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "memweave_memories".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            url: default_qdrant_url(),
            collection: default_collection(),
        }
    }
}

/// Retry budget shared by every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Per-call timeout for judgment, embedding and store calls.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Candidates retrieved per fact.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    #[serde(default = "default_working_memory_capacity")]
    pub working_memory_capacity: usize,
    /// Working memory entries shown to the extractor.
    #[serde(default = "default_working_memory_context")]
    pub working_memory_context: usize,
    #[serde(default = "default_core_memory_max_chars")]
    pub core_memory_max_chars: usize,
    #[serde(default)]
    pub mode: ReconcileMode,
}

fn default_workers() -> usize {
    10
}

fn default_top_k() -> usize {
    3
}

fn default_working_memory_capacity() -> usize {
    5
}

fn default_working_memory_context() -> usize {
    3
}

fn default_core_memory_max_chars() -> usize {
    5000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            top_k: default_top_k(),
            similarity_threshold: None,
            working_memory_capacity: default_working_memory_capacity(),
            working_memory_context: default_working_memory_context(),
            core_memory_max_chars: default_core_memory_max_chars(),
            mode: ReconcileMode::default(),
        }
    }
}

impl PipelineSettings {
    /// Worker count clamped to `1..=MAX_WORKERS`.
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}
