//! Input datasets of reconciliation units.
//!
//! Accepts either a JSON array of units or JSON Lines (one unit per line).
//! Field names follow the unit type, with the LongMemEval aliases
//! (`question_id`, `haystack_sessions`, `haystack_dates`) also accepted.

use std::path::Path;

use thiserror::Error;

use memweave_types::dialogue::ReconciliationUnit;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid unit at line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid dataset: {0}")]
    Document(#[source] serde_json::Error),

    #[error("duplicate unit id '{0}'")]
    DuplicateUnit(String),
}

pub async fn load_units(path: &Path) -> Result<Vec<ReconciliationUnit>, DatasetError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_units(&content)
}

pub fn parse_units(content: &str) -> Result<Vec<ReconciliationUnit>, DatasetError> {
    let units: Vec<ReconciliationUnit> = if content.trim_start().starts_with('[') {
        serde_json::from_str(content).map_err(DatasetError::Document)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| DatasetError::Line {
                    line: idx + 1,
                    source,
                })
            })
            .collect::<Result<_, _>>()?
    };

    let mut seen = std::collections::HashSet::new();
    for unit in &units {
        if !seen.insert(unit.unit_id.as_str()) {
            return Err(DatasetError::DuplicateUnit(unit.unit_id.clone()));
        }
    }
    Ok(units)
}
