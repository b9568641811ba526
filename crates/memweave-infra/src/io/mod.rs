//! Filesystem adapters: input datasets, the progress file, result records.

pub mod dataset;
pub mod progress;
pub mod results;

use std::path::Path;

use memweave_types::error::PersistError;

pub(crate) fn io_error(path: &Path) -> impl Fn(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}
