//! Builds the runtime components (judgment service, embedder, memory store)
//! from a [`PipelineConfig`] and the environment's secrets.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use memweave_core::llm::box_provider::BoxLlmProvider;
use memweave_core::llm::judgment::JudgmentService;
use memweave_core::memory::box_embedder::BoxEmbedder;
use memweave_core::memory::store::MemoryStore;
use memweave_core::retry::RetryPolicy;
use memweave_core::vector::box_store::BoxVectorStore;
use memweave_core::vector::in_memory::InMemoryVectorStore;
use memweave_types::config::{EmbeddingProvider, PipelineConfig, StoreBackend};
use memweave_types::error::{EmbeddingError, StoreError};

use crate::config::{OPENAI_API_KEY, Secrets};
use crate::embedding::fastembed::{self, FastEmbedder};
use crate::embedding::openai::OpenAiEmbedder;
use crate::llm::openai_compat::OpenAiCompatibleProvider;
use crate::llm::openai_compat::config::OpenAiCompatConfig;
use crate::vector::lance::LanceVectorStore;
use crate::vector::qdrant::QdrantVectorStore;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("{0} is not set")]
    MissingApiKey(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Everything a `Reconciler` needs.
pub struct Components {
    pub judgment: Arc<JudgmentService>,
    pub embedder: Arc<BoxEmbedder>,
    pub store: Arc<MemoryStore>,
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn openai_key(secrets: &Secrets) -> Result<SecretString, FactoryError> {
    secrets
        .openai_api_key
        .as_ref()
        .map(copy_secret)
        .ok_or(FactoryError::MissingApiKey(OPENAI_API_KEY))
}

pub fn build_judgment(
    config: &PipelineConfig,
    secrets: &Secrets,
) -> Result<Arc<JudgmentService>, FactoryError> {
    let provider = OpenAiCompatibleProvider::new(OpenAiCompatConfig::from_judgment(
        &config.judgment,
        openai_key(secrets)?,
    ));
    let judgment = JudgmentService::new(
        Arc::new(BoxLlmProvider::new(provider)),
        RetryPolicy::from_config(&config.retry),
    )
    .with_generation(config.judgment.max_tokens, config.judgment.temperature);
    Ok(Arc::new(judgment))
}

pub async fn build_embedder(
    config: &PipelineConfig,
    secrets: &Secrets,
) -> Result<Arc<BoxEmbedder>, FactoryError> {
    let embedding = &config.embedding;

    let embedder = match embedding.provider {
        EmbeddingProvider::OpenAi => {
            let base_url = embedding
                .base_url
                .as_deref()
                .unwrap_or(&config.judgment.base_url);
            BoxEmbedder::new(OpenAiEmbedder::new(
                openai_key(secrets)?,
                base_url,
                &embedding.model,
                embedding.dimension,
            ))
        }
        EmbeddingProvider::FastEmbed => {
            let model = if embedding.model.starts_with("text-embedding") {
                fastembed::DEFAULT_MODEL.to_string()
            } else {
                embedding.model.clone()
            };
            let local = tokio::task::spawn_blocking(move || FastEmbedder::new(&model))
                .await
                .map_err(|e| EmbeddingError::Service(format!("model load task failed: {e}")))??;
            BoxEmbedder::new(local)
        }
    };
    Ok(Arc::new(embedder.with_retry(RetryPolicy::from_config(&config.retry))))
}

pub async fn build_vector_store(
    config: &PipelineConfig,
    secrets: &Secrets,
) -> Result<Arc<BoxVectorStore>, FactoryError> {
    let policy = RetryPolicy::from_config(&config.retry);
    let store = match config.store.backend {
        StoreBackend::Lance => {
            let path = config
                .store
                .path
                .clone()
                .unwrap_or_else(LanceVectorStore::default_path);
            BoxVectorStore::new(LanceVectorStore::new(path).await?)
        }
        StoreBackend::Qdrant => BoxVectorStore::new(QdrantVectorStore::new(
            &config.store.url,
            secrets.qdrant_api_key.as_ref().map(copy_secret),
            policy.call_timeout,
        )?),
        StoreBackend::Memory => BoxVectorStore::new(InMemoryVectorStore::new()),
    };
    Ok(Arc::new(store.with_retry(policy)))
}

/// Memory store over the configured backend, with its collection ready.
pub async fn build_memory_store(
    config: &PipelineConfig,
    secrets: &Secrets,
    dimension: usize,
) -> Result<Arc<MemoryStore>, FactoryError> {
    let backend = build_vector_store(config, secrets).await?;
    let store = MemoryStore::new(backend, config.store.collection.clone(), dimension);
    store.ensure_collection().await?;
    Ok(Arc::new(store))
}

#[tracing::instrument(name = "factory.build", skip_all, fields(backend = %config.store.backend))]
pub async fn build_components(
    config: &PipelineConfig,
    secrets: &Secrets,
) -> Result<Components, FactoryError> {
    let judgment = build_judgment(config, secrets)?;
    let embedder = build_embedder(config, secrets).await?;
    let store = build_memory_store(config, secrets, embedder.dimension()).await?;
    tracing::info!(
        judgment = judgment.provider_name(),
        embedder = embedder.model_name(),
        dimension = embedder.dimension(),
        "pipeline components ready"
    );
    Ok(Components {
        judgment,
        embedder,
        store,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memweave_types::config::StoreConfig;
    use tempfile::TempDir;

    #[test]
    fn judgment_requires_api_key() {
        let config = PipelineConfig::default();
        assert!(matches!(
            build_judgment(&config, &Secrets::default()),
            Err(FactoryError::MissingApiKey(OPENAI_API_KEY))
        ));

        let secrets = Secrets {
            openai_api_key: Some(SecretString::from("sk-test")),
            qdrant_api_key: None,
        };
        let judgment = build_judgment(&config, &secrets).unwrap();
        assert_eq!(judgment.provider_name(), "openai");
        assert_eq!(judgment.policy().max_attempts, 3);
    }

    #[tokio::test]
    async fn memory_backend_store_is_ready() {
        let config = PipelineConfig {
            store: StoreConfig {
                backend: StoreBackend::Memory,
                ..StoreConfig::default()
            },
            ..PipelineConfig::default()
        };
        let store = build_memory_store(&config, &Secrets::default(), 8)
            .await
            .unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert_eq!(store.count("anyone").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lance_backend_uses_configured_path() {
        let tmp = TempDir::new().unwrap();
        let config = PipelineConfig {
            store: StoreConfig {
                backend: StoreBackend::Lance,
                path: Some(tmp.path().join("lance")),
                ..StoreConfig::default()
            },
            ..PipelineConfig::default()
        };
        let store = build_memory_store(&config, &Secrets::default(), 8)
            .await
            .unwrap();
        assert_eq!(store.backend_name(), "lance");
        assert_eq!(store.collection(), "memweave_memories");
        assert!(tmp.path().join("lance").exists());
    }
}
