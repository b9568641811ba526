//! Infrastructure layer for memweave.
//!
//! Contains implementations of the ports defined in `memweave-core`:
//! the OpenAI-compatible judgment provider, OpenAI and fastembed embedders,
//! LanceDB and Qdrant vector stores, and the filesystem adapters for
//! datasets, progress and result records.

pub mod config;
pub mod embedding;
pub mod factory;
pub mod io;
pub mod llm;
pub mod vector;
