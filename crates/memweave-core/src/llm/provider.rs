//! LlmProvider trait definition.
//!
//! This is the core abstraction behind the judgment service. Uses RPITIT for
//! `complete`; `BoxLlmProvider` adds dynamic dispatch on top.

use memweave_types::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for chat-completion backends (OpenAI-compatible APIs, scripted mocks).
///
/// Implementations live in memweave-infra.
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
