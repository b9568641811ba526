//! Reconciliation decisions and their bookkeeping.
//!
//! The judgment service emits loosely-typed action payloads; they are
//! validated into the closed [`ActionDecision`] type before anything touches
//! the store. [`OperationCounts`] aggregates applied outcomes by pointwise sum.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SkipReason;

/// The four reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryAction {
    Add,
    Update,
    Delete,
    None,
}

impl fmt::Display for MemoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryAction::Add => write!(f, "ADD"),
            MemoryAction::Update => write!(f, "UPDATE"),
            MemoryAction::Delete => write!(f, "DELETE"),
            MemoryAction::None => write!(f, "NONE"),
        }
    }
}

impl FromStr for MemoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADD" => Ok(MemoryAction::Add),
            "UPDATE" => Ok(MemoryAction::Update),
            "DELETE" => Ok(MemoryAction::Delete),
            "NONE" | "NOOP" => Ok(MemoryAction::None),
            other => Err(format!("invalid memory action: '{other}'")),
        }
    }
}

/// A validated decision for one fact.
///
/// UPDATE and DELETE always carry a batch-local temp id; ADD and NONE never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "UPPERCASE")]
pub enum ActionDecision {
    Add {
        text: String,
        #[serde(default)]
        details: BTreeMap<String, String>,
    },
    Update {
        temp_id: String,
        text: String,
        #[serde(default)]
        details: BTreeMap<String, String>,
    },
    Delete {
        temp_id: String,
        text: String,
    },
    None {
        text: String,
    },
}

impl ActionDecision {
    pub fn action(&self) -> MemoryAction {
        match self {
            ActionDecision::Add { .. } => MemoryAction::Add,
            ActionDecision::Update { .. } => MemoryAction::Update,
            ActionDecision::Delete { .. } => MemoryAction::Delete,
            ActionDecision::None { .. } => MemoryAction::None,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ActionDecision::Add { text, .. }
            | ActionDecision::Update { text, .. }
            | ActionDecision::Delete { text, .. }
            | ActionDecision::None { text } => text,
        }
    }

    pub fn temp_id(&self) -> Option<&str> {
        match self {
            ActionDecision::Update { temp_id, .. } | ActionDecision::Delete { temp_id, .. } => {
                Some(temp_id)
            }
            _ => None,
        }
    }
}

/// Per-action counters for one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    #[serde(rename = "ADD")]
    pub add: u64,
    #[serde(rename = "UPDATE")]
    pub update: u64,
    #[serde(rename = "DELETE")]
    pub delete: u64,
    #[serde(rename = "NONE")]
    pub none: u64,
}

impl OperationCounts {
    pub fn new(add: u64, update: u64, delete: u64, none: u64) -> Self {
        Self {
            add,
            update,
            delete,
            none,
        }
    }

    /// Increment the counter for `action` by one.
    pub fn record(&mut self, action: MemoryAction) {
        match action {
            MemoryAction::Add => self.add += 1,
            MemoryAction::Update => self.update += 1,
            MemoryAction::Delete => self.delete += 1,
            MemoryAction::None => self.none += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.add + self.update + self.delete + self.none
    }

    /// Number of decisions that mutated the store.
    pub fn mutations(&self) -> u64 {
        self.add + self.update + self.delete
    }
}

impl Add for OperationCounts {
    type Output = OperationCounts;

    fn add(self, rhs: OperationCounts) -> OperationCounts {
        OperationCounts {
            add: self.add + rhs.add,
            update: self.update + rhs.update,
            delete: self.delete + rhs.delete,
            none: self.none + rhs.none,
        }
    }
}

impl AddAssign for OperationCounts {
    fn add_assign(&mut self, rhs: OperationCounts) {
        *self = *self + rhs;
    }
}

impl Sum for OperationCounts {
    fn sum<I: Iterator<Item = OperationCounts>>(iter: I) -> Self {
        iter.fold(OperationCounts::default(), Add::add)
    }
}

impl<'a> Sum<&'a OperationCounts> for OperationCounts {
    fn sum<I: Iterator<Item = &'a OperationCounts>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for OperationCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ADD={} UPDATE={} DELETE={} NONE={}",
            self.add, self.update, self.delete, self.none
        )
    }
}

/// Whether a decision reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Applied,
    Skipped,
}

/// One line of the per-decision audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionAudit {
    pub fact_index: usize,
    pub fact_text: String,
    /// The action the judgment asked for (NONE for invalid payloads).
    pub action: MemoryAction,
    /// Real store id touched by the action, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Content of the record before an UPDATE replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<String>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}
