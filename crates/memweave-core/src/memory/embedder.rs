//! Embedder trait for text-to-vector conversion.
//!
//! Implementations (OpenAI embeddings, local fastembed models) live in
//! memweave-infra.

use memweave_types::error::EmbeddingError;

/// Trait for converting text into embedding vectors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// A failed embedding is always an error, never a zero vector.
pub trait Embedder: Send + Sync {
    /// Embed one or more texts into vectors, one per input text.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send;

    /// The model name used for embeddings (e.g., "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// The dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}
