//! Pipeline logic and port definitions for memweave.
//!
//! This crate defines the "ports" (LLM provider, embedder, vector store,
//! progress/result persistence) that the infrastructure layer implements,
//! and the reconciliation pipeline built on them. It depends only on
//! `memweave-types` -- never on `memweave-infra` or any network/database crate.

pub mod json_repair;
pub mod llm;
pub mod memory;
pub mod reconcile;
pub mod retry;
pub mod vector;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
