//! Deterministic stand-ins for the external services.
//!
//! Compiled for this crate's tests and, through the `testing` feature, for
//! integration tests in downstream crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use memweave_types::error::EmbeddingError;
use memweave_types::llm::{CompletionRequest, CompletionResponse, LlmError, StopReason, Usage};

use crate::llm::provider::LlmProvider;
use crate::memory::embedder::Embedder;

type Responder = dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync;

/// LLM provider that replays a script, then falls back to a responder.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Arc<Responder>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every request with the same result.
    pub fn repeating(result: Result<String, LlmError>) -> Self {
        Self::with_responder(move |_| match &result {
            Ok(text) => Ok(text.clone()),
            Err(err) => Err(duplicate_error(err)),
        })
    }

    /// Answer each request by inspecting it.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn request_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let result = match (scripted, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(LlmError::Provider {
                message: "script exhausted".to_string(),
            }),
        };

        result.map(|content| CompletionResponse {
            id: "scripted".to_string(),
            content,
            model: "scripted-model".to_string(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }
}

fn duplicate_error(err: &LlmError) -> LlmError {
    match err {
        LlmError::Provider { message } => LlmError::Provider {
            message: message.clone(),
        },
        LlmError::Deserialization(m) => LlmError::Deserialization(m.clone()),
        LlmError::RateLimited { retry_after_ms } => LlmError::RateLimited {
            retry_after_ms: *retry_after_ms,
        },
        LlmError::Overloaded(m) => LlmError::Overloaded(m.clone()),
        LlmError::Timeout(ms) => LlmError::Timeout(*ms),
        LlmError::AuthenticationFailed => LlmError::AuthenticationFailed,
        LlmError::ContextLengthExceeded { max, requested } => LlmError::ContextLengthExceeded {
            max: *max,
            requested: *requested,
        },
        LlmError::InvalidRequest(m) => LlmError::InvalidRequest(m.clone()),
    }
}

/// Embedder that times out a fixed number of times before delegating.
pub struct FlakyEmbedder<E> {
    inner: E,
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl<E: Embedder> FlakyEmbedder<E> {
    pub fn new(inner: E, failures: usize) -> Self {
        Self {
            inner,
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl<E: Embedder> Embedder for FlakyEmbedder<E> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(EmbeddingError::Timeout(10));
        }
        self.inner.embed(texts).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Bag-of-words hashing embedder.
///
/// Identical texts map to identical unit vectors; texts sharing words are
/// closer than unrelated ones.
pub struct HashEmbedder {
    dimension: usize,
    fail_on: Option<String>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_on: None,
        }
    }

    /// Fail any text containing `marker`.
    pub fn failing_on(dimension: usize, marker: &str) -> Self {
        Self {
            dimension,
            fail_on: Some(marker.to_string()),
        }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let mut any = false;
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let slot = (fnv1a(word) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
            any = true;
        }
        if !any {
            vector[0] = 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter_mut().for_each(|v| *v /= norm);
        vector
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(marker) = &self.fail_on {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(EmbeddingError::Service(format!("refused text containing '{marker}'")));
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
