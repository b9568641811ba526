//! Memory types for memweave.
//!
//! These types model a user's long-term memory: extracted facts, the
//! records that hold them in the vector store, the short-horizon working
//! memory buffer, and the evolving core memory profile.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp sentinel for facts whose chunk carried no recognizable date.
pub const UNKNOWN_TIMESTAMP: &str = "Unknown";

/// Core memory value before anything has been learned about the user.
pub const EMPTY_CORE_MEMORY: &str = "No core memory yet.";

/// An atomic piece of user information extracted from one dialogue chunk.
///
/// Immutable once produced by the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub text: String,
    /// Ordered "Category: Value" strings.
    #[serde(default)]
    pub details: Vec<String>,
    /// ISO calendar date (`YYYY-MM-DD`) or [`UNKNOWN_TIMESTAMP`].
    pub timestamp: String,
}

impl Fact {
    pub fn new(
        text: impl Into<String>,
        details: Vec<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            details,
            timestamp: timestamp.into(),
        }
    }

    pub fn has_known_timestamp(&self) -> bool {
        self.timestamp != UNKNOWN_TIMESTAMP
    }

    /// Split `details` into a key/value map at the first `:` of each entry.
    ///
    /// Entries without a colon are kept under a positional `detail_N` key.
    pub fn details_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for (idx, entry) in self.details.iter().enumerate() {
            match entry.split_once(':') {
                Some((key, value)) if !key.trim().is_empty() => {
                    map.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => {
                    map.insert(format!("detail_{idx}"), entry.trim().to_string());
                }
            }
        }
        if self.has_known_timestamp() {
            map.insert("timestamp".to_string(), self.timestamp.clone());
        }
        map
    }
}

/// Kind of memory a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    #[default]
    Semantic,
    Episodic,
    Core,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Semantic => write!(f, "semantic"),
            MemoryType::Episodic => write!(f, "episodic"),
            MemoryType::Core => write!(f, "core"),
        }
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(MemoryType::Semantic),
            "episodic" => Ok(MemoryType::Episodic),
            "core" => Ok(MemoryType::Core),
            other => Err(format!("invalid memory type: '{other}'")),
        }
    }
}

/// A memory owned by the vector store.
///
/// `created_at` never changes once the record exists; `updated_at` moves
/// only when an UPDATE is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Opaque store identifier.
    pub id: String,
    /// Namespace the record belongs to.
    pub user_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub memory_type: MemoryType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

/// A record returned from similarity search with its normalized score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    /// Similarity in `[0, 1]` for cosine backends, higher is closer.
    pub similarity: f32,
}

/// One entry in the working memory FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// Single-string user profile that evolves once per dialogue turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreMemorySnapshot(String);

impl CoreMemorySnapshot {
    pub fn new(profile: impl Into<String>) -> Self {
        Self(profile.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the snapshot holds the sentinel or nothing at all.
    pub fn is_empty_profile(&self) -> bool {
        is_empty_profile(&self.0)
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for CoreMemorySnapshot {
    fn default() -> Self {
        Self(EMPTY_CORE_MEMORY.to_string())
    }
}

impl fmt::Display for CoreMemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a profile string carries no information.
pub fn is_empty_profile(profile: &str) -> bool {
    let trimmed = profile.trim();
    trimmed.is_empty() || trimmed == EMPTY_CORE_MEMORY
}
