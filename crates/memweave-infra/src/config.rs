//! Configuration loader for memweave.
//!
//! Reads `memweave.toml` and deserializes it into [`PipelineConfig`]. Falls
//! back to defaults when the file is missing or malformed. Environment
//! variables override endpoint settings and supply API keys.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use memweave_types::config::PipelineConfig;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const QDRANT_API_KEY: &str = "QDRANT_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const MEMWEAVE_MODEL: &str = "MEMWEAVE_MODEL";
pub const QDRANT_URL: &str = "QDRANT_URL";

/// API keys resolved from the environment. Never serialized or logged.
#[derive(Default)]
pub struct Secrets {
    pub openai_api_key: Option<SecretString>,
    pub qdrant_api_key: Option<SecretString>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secret = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };
        Self {
            openai_api_key: secret(OPENAI_API_KEY),
            qdrant_api_key: secret(QDRANT_API_KEY),
        }
    }
}

/// `~/.memweave`, or `./.memweave` without a home directory.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memweave")
}

pub fn default_config_path() -> PathBuf {
    data_dir().join("memweave.toml")
}

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`PipelineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_config(path: &Path) -> PipelineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return PipelineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return PipelineConfig::default();
        }
    };

    match toml::from_str::<PipelineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            PipelineConfig::default()
        }
    }
}

/// Apply `OPENAI_BASE_URL`, `MEMWEAVE_MODEL` and `QDRANT_URL` overrides.
pub fn apply_env_overrides(config: &mut PipelineConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

pub fn apply_overrides(config: &mut PipelineConfig, lookup: impl Fn(&str) -> Option<String>) {
    let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(base_url) = value(OPENAI_BASE_URL) {
        config.judgment.base_url = base_url;
    }
    if let Some(model) = value(MEMWEAVE_MODEL) {
        config.judgment.model = model;
    }
    if let Some(url) = value(QDRANT_URL) {
        config.store.url = url;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use memweave_types::config::StoreBackend;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("memweave.toml")).await;
        assert_eq!(config.pipeline.workers, 10);
        assert_eq!(config.store.backend, StoreBackend::Lance);
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memweave.toml");
        tokio::fs::write(
            &path,
            r#"
[judgment]
model = "gpt-4.1-mini"

[store]
backend = "memory"

[retry]
max_attempts = 5
"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config.judgment.model, "gpt-4.1-mini");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 1000);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memweave.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config.pipeline.top_k, 3);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = PipelineConfig::default();
        apply_overrides(
            &mut config,
            env(&[
                (OPENAI_BASE_URL, "http://localhost:8000/v1"),
                (MEMWEAVE_MODEL, "qwen2.5-7b"),
                (QDRANT_URL, "  "),
            ]),
        );
        assert_eq!(config.judgment.base_url, "http://localhost:8000/v1");
        assert_eq!(config.judgment.model, "qwen2.5-7b");
        assert_eq!(config.store.url, "http://localhost:6333");
    }

    #[test]
    fn secrets_skip_blank_values() {
        let secrets =
            Secrets::from_lookup(env(&[(OPENAI_API_KEY, "sk-live"), (QDRANT_API_KEY, "")]));
        assert_eq!(
            secrets.openai_api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-live".to_string())
        );
        assert!(secrets.qdrant_api_key.is_none());
    }
}
