//! BoxEmbedder -- object-safe dynamic dispatch wrapper for Embedder.
//!
//! Same blanket-impl pattern as BoxLlmProvider. The wrapper also owns the
//! per-call timeout and retry budget, and checks every vector against the
//! declared dimension.

use std::future::Future;
use std::pin::Pin;

use memweave_types::error::EmbeddingError;

use super::embedder::Embedder;
use crate::retry::RetryPolicy;

/// Object-safe version of [`Embedder`] with boxed futures.
pub trait EmbedderDyn: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>>;

    fn model_name_dyn(&self) -> &str;

    fn dimension_dyn(&self) -> usize;
}

impl<T: Embedder> EmbedderDyn for T {
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>> {
        Box::pin(self.embed(texts))
    }

    fn model_name_dyn(&self) -> &str {
        self.model_name()
    }

    fn dimension_dyn(&self) -> usize {
        self.dimension()
    }
}

/// Type-erased embedder for runtime selection (OpenAI vs fastembed).
pub struct BoxEmbedder {
    inner: Box<dyn EmbedderDyn + Send + Sync>,
    policy: RetryPolicy,
}

impl BoxEmbedder {
    /// Wrap a concrete `Embedder` in a type-erased box.
    ///
    /// Makes a single attempt per call until [`with_retry`](Self::with_retry)
    /// installs a budget.
    pub fn new<T: Embedder + 'static>(embedder: T) -> Self {
        Self {
            inner: Box::new(embedder),
            policy: RetryPolicy::immediate(1),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Embed a batch, retrying timeouts and service failures.
    ///
    /// Any vector of the wrong length fails the whole batch.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 1;
        loop {
            match self.embed_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() && self.policy.should_retry(attempt) => {
                    tracing::warn!(
                        error = %err,
                        attempt,
                        model = self.model_name(),
                        "embedding call failed; retrying"
                    );
                    self.policy.wait_after(attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let timeout = self.policy.call_timeout;
        let vectors = tokio::time::timeout(timeout, self.inner.embed_boxed(texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(timeout.as_millis() as u64))??;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Service(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        let expected = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [text.to_string()];
        self.embed(&texts)
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::Empty)
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name_dyn()
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension_dyn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyEmbedder, HashEmbedder};

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
        }

        fn model_name(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn embed_one_returns_declared_dimension() {
        let embedder = BoxEmbedder::new(HashEmbedder::new(32));
        let vector = embedder.embed_one("User likes tea").await.unwrap();
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.model_name(), "hash");
    }

    #[tokio::test]
    async fn wrong_length_is_dimension_mismatch() {
        let embedder = BoxEmbedder::new(ShortEmbedder);
        let err = embedder.embed_one("x").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let flaky = FlakyEmbedder::new(HashEmbedder::new(16), 2);
        let calls = flaky.call_counter();
        let embedder = BoxEmbedder::new(flaky).with_retry(RetryPolicy::immediate(3));

        let vector = embedder.embed_one("User likes tea").await.unwrap();
        assert_eq!(vector.len(), 16);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_attempt_by_default() {
        let flaky = FlakyEmbedder::new(HashEmbedder::new(16), 1);
        let calls = flaky.call_counter();
        let embedder = BoxEmbedder::new(flaky);

        let err = embedder.embed_one("User likes tea").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Timeout(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_not_retried() {
        let embedder = BoxEmbedder::new(ShortEmbedder).with_retry(RetryPolicy::immediate(5));
        let err = embedder.embed_one("x").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn slow_embedder_times_out() {
        struct Stalled;

        impl Embedder for Stalled {
            async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                std::future::pending().await
            }

            fn model_name(&self) -> &str {
                "stalled"
            }

            fn dimension(&self) -> usize {
                4
            }
        }

        let policy = RetryPolicy {
            call_timeout: std::time::Duration::from_millis(10),
            ..RetryPolicy::immediate(2)
        };
        let embedder = BoxEmbedder::new(Stalled).with_retry(policy);
        assert!(matches!(
            embedder.embed_one("x").await,
            Err(EmbeddingError::Timeout(10))
        ));
    }
}
