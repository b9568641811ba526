//! Vector store backends.
//!
//! LanceDB (embedded, on-disk) and Qdrant (REST). The in-process backend
//! lives in `memweave-core` next to the trait.

pub mod lance;
pub mod qdrant;
