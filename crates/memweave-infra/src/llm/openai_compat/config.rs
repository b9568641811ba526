//! Configuration for OpenAI-compatible judgment providers.

use secrecy::SecretString;

use memweave_types::config::JudgmentConfig;

/// Configuration for an OpenAI-compatible chat completion endpoint.
///
/// Used to construct an [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Human-readable provider name (e.g., "openai", "vllm").
    pub provider_name: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    pub base_url: String,
    pub api_key: SecretString,
    /// Model used when a request leaves `model` empty.
    pub model: String,
}

impl OpenAiCompatConfig {
    pub fn from_judgment(config: &JudgmentConfig, api_key: SecretString) -> Self {
        Self {
            provider_name: config.provider.clone(),
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
        }
    }
}

/// OpenAI default configuration.
///
/// Base URL: `https://api.openai.com/v1`
pub fn openai_defaults(api_key: SecretString, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "openai".into(),
        base_url: "https://api.openai.com/v1".into(),
        api_key,
        model: model.into(),
    }
}
