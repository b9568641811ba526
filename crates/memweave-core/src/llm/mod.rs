//! Judgment service abstractions.
//!
//! Defines the `LlmProvider` trait, its type-erased wrapper `BoxLlmProvider`,
//! and `JudgmentService`, which adds timeouts, retries, and JSON recovery.

pub mod box_provider;
pub mod judgment;
pub mod provider;
