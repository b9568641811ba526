//! The fact reconciliation pipeline.
//!
//! `session` runs one unit end to end using the `arbiter` (with its
//! `temp_ids` mapping) and the `applier`; `orchestrator` fans units out over
//! a bounded worker pool and persists through the `persist` ports.

pub mod applier;
pub mod arbiter;
pub mod orchestrator;
pub mod persist;
pub mod session;
pub mod temp_ids;
