//! Vector store abstraction.
//!
//! `VectorStore` is the backend-neutral contract, `BoxVectorStore` its
//! type-erased wrapper, `RecordFilter` the filter language every backend
//! translates, and `InMemoryVectorStore` the in-process backend.

pub mod box_store;
pub mod filter;
pub mod in_memory;
pub mod store;
