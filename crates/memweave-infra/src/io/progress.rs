//! JSON progress file: `{"processed_unit_ids": [...], "timestamp": "..."}`.
//!
//! Rewritten after every completed unit via a sibling temp file and a
//! rename, so a crash mid-write leaves the previous snapshot intact.

use std::path::{Path, PathBuf};

use memweave_core::reconcile::persist::ProgressStore;
use memweave_types::error::PersistError;
use memweave_types::run::ProgressSnapshot;

use super::io_error;

#[derive(Debug, Clone)]
pub struct JsonProgressFile {
    path: PathBuf,
}

impl JsonProgressFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "progress.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ProgressStore for JsonProgressFile {
    async fn load(&self) -> Result<ProgressSnapshot, PersistError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(ProgressSnapshot::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(ProgressSnapshot::default())
            }
            Err(err) => Err(io_error(&self.path)(err)),
        }
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await.map_err(io_error(&temp))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(io_error(&self.path))?;
        Ok(())
    }
}
