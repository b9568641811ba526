//! Judgment service: prompt in, text (or recovered JSON) out.
//!
//! Wraps a [`BoxLlmProvider`] with a per-call timeout and the shared retry
//! budget. Every call is traced under a `gen_ai.complete` span.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, info_span};

use memweave_types::error::MalformedResponse;
use memweave_types::llm::{CompletionRequest, LlmError};

use super::box_provider::BoxLlmProvider;
use crate::json_repair;
use crate::retry::RetryPolicy;

/// A judgment call that used up its retry budget.
#[derive(Debug, Error)]
pub enum JudgmentFailure {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}

pub struct JudgmentService {
    provider: Arc<BoxLlmProvider>,
    policy: RetryPolicy,
    max_tokens: u32,
    temperature: f64,
}

impl JudgmentService {
    pub fn new(provider: Arc<BoxLlmProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            max_tokens: 2000,
            temperature: 0.0,
        }
    }

    pub fn with_generation(mut self, max_tokens: u32, temperature: f64) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// One provider call bounded by the per-call timeout.
    async fn call_once(
        &self,
        operation: &'static str,
        system: Option<&str>,
        user: &str,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::judgment(system, user, self.max_tokens)
            .with_temperature(self.temperature)
            .with_json_mode(json_mode);

        let span = info_span!(
            "gen_ai.complete",
            gen_ai.system = self.provider.name(),
            gen_ai.operation.name = operation,
            gen_ai.request.model = self.provider.default_model(),
            gen_ai.request.max_tokens = request.max_tokens,
        );

        let timeout = self.policy.call_timeout;
        match tokio::time::timeout(timeout, self.provider.complete(&request))
            .instrument(span)
            .await
        {
            Ok(Ok(response)) => Ok(response.content),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LlmError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Free-form completion, retrying transient provider failures.
    pub async fn complete(
        &self,
        operation: &'static str,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, LlmError> {
        let mut attempt = 1;
        loop {
            match self.call_once(operation, system, user, false).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && self.policy.should_retry(attempt) => {
                    tracing::warn!(
                        error = %err,
                        attempt,
                        operation,
                        "judgment call failed; retrying"
                    );
                    self.policy.wait_after(attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Completion whose output must decode to JSON.
    ///
    /// Transient provider failures and unrecoverable output share one retry
    /// budget: at most `max_attempts` calls are made in total.
    pub async fn complete_json(
        &self,
        operation: &'static str,
        system: Option<&str>,
        user: &str,
        array_field: &str,
    ) -> Result<Value, JudgmentFailure> {
        let mut attempt = 1;
        loop {
            let failure = match self.call_once(operation, system, user, true).await {
                Ok(text) => match json_repair::decode_with_field(&text, array_field) {
                    Ok(value) => return Ok(value),
                    Err(malformed) => JudgmentFailure::Malformed(malformed),
                },
                Err(err) if err.is_retryable() => JudgmentFailure::Llm(err),
                Err(err) => return Err(JudgmentFailure::Llm(err)),
            };

            if !self.policy.should_retry(attempt) {
                return Err(failure);
            }
            tracing::warn!(
                error = %failure,
                attempt,
                operation,
                "judgment output unusable; retrying"
            );
            self.policy.wait_after(attempt).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn service(provider: ScriptedProvider, attempts: u32) -> JudgmentService {
        JudgmentService::new(
            Arc::new(BoxLlmProvider::new(provider)),
            RetryPolicy::immediate(attempts),
        )
    }

    #[tokio::test]
    async fn complete_json_retries_malformed_output() {
        let provider = ScriptedProvider::new(vec![
            Ok("no json here".to_string()),
            Ok(r#"{"facts": []}"#.to_string()),
        ]);
        let calls = provider.call_counter();
        let judgment = service(provider, 3);

        let value = judgment
            .complete_json("extract_facts", None, "hi", "facts")
            .await
            .unwrap();
        assert_eq!(value["facts"], serde_json::json!([]));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn complete_json_gives_up_after_budget() {
        let provider = ScriptedProvider::repeating(Ok("still not json".to_string()));
        let calls = provider.call_counter();
        let judgment = service(provider, 3);

        let err = judgment
            .complete_json("extract_facts", None, "hi", "facts")
            .await
            .unwrap_err();
        assert!(matches!(err, JudgmentFailure::Malformed(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let provider = ScriptedProvider::repeating(Err(LlmError::AuthenticationFailed));
        let calls = provider.call_counter();
        let judgment = service(provider, 3);

        let err = judgment.complete("update_core", None, "hi").await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::RateLimited { retry_after_ms: None }),
            Ok("profile".to_string()),
        ]);
        let judgment = service(provider, 3);
        let text = judgment.complete("update_core", None, "hi").await.unwrap();
        assert_eq!(text, "profile");
    }
}
