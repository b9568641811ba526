//! Memory layer: embeddings, the record store adapter, working and core
//! memory, fact extraction, and similarity retrieval.

pub mod box_embedder;
pub mod core_memory;
pub mod embedder;
pub mod extractor;
pub mod retriever;
pub mod store;
pub mod working;
