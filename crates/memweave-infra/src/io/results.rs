//! JSONL result records, one [`UnitResult`] per line, appended as units
//! complete. Each write is flushed before the unit is marked processed.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use memweave_core::reconcile::persist::ResultSink;
use memweave_types::error::PersistError;
use memweave_types::run::UnitResult;

use super::io_error;

pub struct JsonlResultSink {
    file: File,
    path: PathBuf,
}

impl JsonlResultSink {
    /// Open `path` for appending, creating it (and its parent) if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonlResultSink {
    async fn write(&mut self, result: &UnitResult) -> Result<(), PersistError> {
        let mut line = serde_json::to_string(result)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(io_error(&self.path))?;
        self.file.flush().await.map_err(io_error(&self.path))?;
        self.file.sync_data().await.map_err(io_error(&self.path))
    }
}

/// Read every record back, skipping blank lines.
pub async fn read_results(path: &Path) -> Result<Vec<UnitResult>, PersistError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(io_error(path))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(PersistError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use memweave_types::decision::OperationCounts;
    use tempfile::TempDir;

    fn result(id: &str, adds: u64) -> UnitResult {
        UnitResult {
            unit_id: id.into(),
            operation_counts: OperationCounts::new(adds, 0, 0, 1),
            core_memory: "Likes tea.".into(),
            audit: Vec::new(),
            turns_processed: 2,
            degraded: false,
        }
    }

    #[tokio::test]
    async fn appends_across_reopens() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("results.jsonl");

        let mut sink = JsonlResultSink::open(&path).await.unwrap();
        sink.write(&result("a", 1)).await.unwrap();
        drop(sink);

        let mut sink = JsonlResultSink::open(&path).await.unwrap();
        sink.write(&result("b", 2)).await.unwrap();

        let records = read_results(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], result("b", 2));

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["unit_id"], "a");
        assert!(first["operation_counts"].is_object());
        assert!(first["core_memory"].is_string());
        assert!(first["audit"].is_array());
    }
}
