//! FastEmbed-based local embedding generator.
//!
//! Implements the `Embedder` trait from `memweave-core` with fastembed's
//! ONNX runtime inference. The model is CPU-bound and needs `&mut self`, so
//! it sits behind a mutex and every batch runs on the blocking pool.

use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use memweave_core::memory::embedder::Embedder;
use memweave_types::error::EmbeddingError;

/// Default local model and its dimension.
pub const DEFAULT_MODEL: &str = "BAAI/bge-small-en-v1.5";
pub const DEFAULT_DIMENSION: usize = 384;

pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Load (downloading on first use) the named fastembed model.
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let model_kind = resolve_model(model_name)?;
        let dimension = TextEmbedding::get_model_info(&model_kind)
            .map(|info| info.dim)
            .map_err(|e| EmbeddingError::Service(e.to_string()))?;

        let model = TextEmbedding::try_new(
            InitOptions::new(model_kind).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::Service(format!("failed to load {model_name}: {e}")))?;

        tracing::info!(model = model_name, dimension, "loaded local embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

/// Map a model code like `BAAI/bge-small-en-v1.5` to fastembed's enum.
pub fn resolve_model(name: &str) -> Result<EmbeddingModel, EmbeddingError> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(name))
        .map(|info| info.model)
        .ok_or_else(|| EmbeddingError::Service(format!("unsupported fastembed model '{name}'")))
}

impl Embedder for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Service("embedding model lock poisoned".into()))?;
            model
                .embed(batch, None)
                .map_err(|e| EmbeddingError::Service(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Service(format!("embedding task failed: {e}")))?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
