//! Shared domain types for memweave.
//!
//! This crate contains the domain types used across the reconciliation
//! pipeline: facts, memory records, action decisions, operation counts,
//! dialogue units, run results, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod decision;
pub mod dialogue;
pub mod error;
pub mod llm;
pub mod memory;
pub mod run;
