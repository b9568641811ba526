//! Per-unit results, resume progress, and run summaries.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::decision::{DecisionAudit, OperationCounts};
use crate::memory::EMPTY_CORE_MEMORY;

/// How facts are turned into store mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileMode {
    /// Full ADD/UPDATE/DELETE/NONE arbitration.
    #[default]
    Arbitrated,
    /// Degraded mode: every extracted fact is added without arbitration.
    AppendOnly,
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileMode::Arbitrated => write!(f, "arbitrated"),
            ReconcileMode::AppendOnly => write!(f, "append-only"),
        }
    }
}

impl FromStr for ReconcileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arbitrated" => Ok(ReconcileMode::Arbitrated),
            "append-only" | "append_only" => Ok(ReconcileMode::AppendOnly),
            other => Err(format!("invalid reconcile mode: '{other}'")),
        }
    }
}

/// The batch result record written for every reconciliation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: String,
    pub operation_counts: OperationCounts,
    pub core_memory: String,
    #[serde(default)]
    pub audit: Vec<DecisionAudit>,
    #[serde(default)]
    pub turns_processed: usize,
    /// True when at least one step fell back to an empty result.
    #[serde(default)]
    pub degraded: bool,
}

impl UnitResult {
    /// Result for a unit that produced nothing: all-zero counts, prior core memory.
    pub fn failed(unit_id: impl Into<String>, core_memory: Option<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            operation_counts: OperationCounts::default(),
            core_memory: core_memory.unwrap_or_else(|| EMPTY_CORE_MEMORY.to_string()),
            audit: Vec::new(),
            turns_processed: 0,
            degraded: true,
        }
    }
}

/// Resume state: which units are already reconciled.
///
/// Used only to skip work on rerun, never as a source of memory content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub processed_unit_ids: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl ProgressSnapshot {
    pub fn contains(&self, unit_id: &str) -> bool {
        self.processed_unit_ids.iter().any(|id| id == unit_id)
    }

    /// Append `unit_id` (if new) and refresh the timestamp.
    pub fn mark_processed(&mut self, unit_id: &str) {
        if !self.contains(unit_id) {
            self.processed_unit_ids.push(unit_id.to_string());
        }
        self.timestamp = Utc::now().to_rfc3339();
    }
}

/// Outcome of one orchestrated run over many units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub results: Vec<UnitResult>,
    pub totals: OperationCounts,
    /// Units skipped because the progress file already listed them.
    pub skipped_units: Vec<String>,
}
