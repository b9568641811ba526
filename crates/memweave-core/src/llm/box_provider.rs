//! Type-erased judgment provider.
//!
//! `LlmProvider::complete` returns `impl Future`, so the trait is not object
//! safe. `CompleteDyn` boxes the future, and every `LlmProvider` gets it for
//! free; `BoxLlmProvider` is what the pipeline actually holds.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use memweave_types::llm::{CompletionRequest, CompletionResponse, LlmError};

use super::provider::LlmProvider;

type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>>;

pub trait CompleteDyn: Send + Sync {
    fn provider_name(&self) -> &str;

    fn provider_model(&self) -> &str;

    fn complete_dyn<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a>;
}

impl<T: LlmProvider> CompleteDyn for T {
    fn provider_name(&self) -> &str {
        self.name()
    }

    fn provider_model(&self) -> &str {
        self.default_model()
    }

    fn complete_dyn<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(self.complete(request))
    }
}

/// Judgment provider chosen at runtime (OpenAI-compatible endpoint or a
/// scripted stand-in).
pub struct BoxLlmProvider {
    inner: Box<dyn CompleteDyn>,
}

impl BoxLlmProvider {
    pub fn new<T: LlmProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.provider_name()
    }

    pub fn default_model(&self) -> &str {
        self.inner.provider_model()
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        self.inner.complete_dyn(request).await
    }
}

impl fmt::Debug for BoxLlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxLlmProvider")
            .field("name", &self.name())
            .field("model", &self.default_model())
            .finish()
    }
}
