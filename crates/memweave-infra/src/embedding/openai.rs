//! OpenAI-compatible embedding client.
//!
//! Implements the `Embedder` trait from `memweave-core` against the
//! `/embeddings` endpoint. One request embeds a whole batch; results are
//! reordered by their `index` field.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::CreateEmbeddingRequestArgs;
use secrecy::{ExposeSecret, SecretString};

use memweave_core::memory::embedder::Embedder;
use memweave_types::error::EmbeddingError;

/// Remote embedder. Does NOT derive Debug (the client holds the API key).
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: SecretString, base_url: &str, model: &str, dimension: usize) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            dimension,
        }
    }

    /// Only the `text-embedding-3` family accepts a `dimensions` parameter.
    fn supports_dimensions(&self) -> bool {
        self.model.starts_with("text-embedding-3")
    }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = CreateEmbeddingRequestArgs::default();
        args.model(&self.model).input(texts.to_vec());
        if self.supports_dimensions() {
            args.dimensions(self.dimension as u32);
        }
        let request = args
            .build()
            .map_err(|e| EmbeddingError::Service(format!("invalid embedding request: {e}")))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Service(e.to_string()))?;

        let mut data = response.data;
        if data.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_only_sent_to_v3_models() {
        let v3 = OpenAiEmbedder::new(
            SecretString::from("sk-test"),
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            1536,
        );
        assert!(v3.supports_dimensions());
        assert_eq!(v3.dimension(), 1536);

        let ada = OpenAiEmbedder::new(
            SecretString::from("sk-test"),
            "https://api.openai.com/v1",
            "text-embedding-ada-002",
            1536,
        );
        assert!(!ada.supports_dimensions());
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let embedder = OpenAiEmbedder::new(
            SecretString::from("sk-test"),
            "http://127.0.0.1:9/v1",
            "text-embedding-3-small",
            8,
        );
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
