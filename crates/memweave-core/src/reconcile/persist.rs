//! Persistence ports for run state.
//!
//! Implemented in memweave-infra (JSON progress file, JSONL results) and by
//! in-memory doubles in tests.

use std::future::Future;

use memweave_types::error::PersistError;
use memweave_types::run::{ProgressSnapshot, UnitResult};

/// Durable record of which units have completed.
pub trait ProgressStore: Send + Sync {
    /// Current snapshot; an absent store reads as empty.
    fn load(&self) -> impl Future<Output = Result<ProgressSnapshot, PersistError>> + Send;

    /// Replace the stored snapshot.
    fn save(
        &self,
        snapshot: &ProgressSnapshot,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;
}

/// Destination for per-unit result records.
pub trait ResultSink: Send {
    fn write(
        &mut self,
        result: &UnitResult,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;
}

/// Progress kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryProgress {
    snapshot: std::sync::Mutex<ProgressSnapshot>,
}

impl MemoryProgress {
    pub fn new(snapshot: ProgressSnapshot) -> Self {
        Self {
            snapshot: std::sync::Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl ProgressStore for MemoryProgress {
    async fn load(&self) -> Result<ProgressSnapshot, PersistError> {
        Ok(self.snapshot())
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), PersistError> {
        if let Ok(mut current) = self.snapshot.lock() {
            *current = snapshot.clone();
        }
        Ok(())
    }
}

/// Collects results in a vector.
impl ResultSink for Vec<UnitResult> {
    async fn write(&mut self, result: &UnitResult) -> Result<(), PersistError> {
        self.push(result.clone());
        Ok(())
    }
}
