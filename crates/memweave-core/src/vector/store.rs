//! VectorStore trait: backend-neutral CRUD and similarity search.
//!
//! Every backend (LanceDB, Qdrant, in-process) exposes the same contract:
//!
//! - mutations (`insert`, `upsert`, `delete`) return only once the change is
//!   durable and visible to the next read, whatever flushing that takes
//! - `search` reports a normalized similarity (higher is closer) and applies
//!   `similarity_threshold` as a post-filter on it
//!
//! Implementations live in memweave-infra, except the in-process backend
//! used for tests and dry runs.

use serde_json::{Map, Value};

use memweave_types::error::StoreError;

use super::filter::RecordFilter;

/// One stored row: id, vector, and a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub id: String,
    /// Empty when a query did not ask for vectors.
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A search hit with normalized similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub row: VectorRow,
    pub similarity: f32,
}

/// Collection layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    /// Scalar string payload keys that filters may reference.
    pub indexed_fields: Vec<String>,
}

/// Payload key projection used by `query`: `None` returns the full payload.
pub type FieldSelection<'a> = Option<&'a [String]>;

/// Trait for vector store backends.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait VectorStore: Send + Sync {
    /// Backend name for logs (e.g., "lance", "qdrant").
    fn backend_name(&self) -> &str;

    /// Create a collection. Creating an existing collection is a no-op.
    fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn has_collection(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Drop a collection. Dropping a missing collection is a no-op.
    fn drop_collection(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Make a collection ready to serve searches.
    fn load_collection(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Insert new rows. An id that already exists is a `Conflict`.
    fn insert(
        &self,
        collection: &str,
        rows: Vec<VectorRow>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Insert or replace rows by id.
    fn upsert(
        &self,
        collection: &str,
        rows: Vec<VectorRow>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete matching rows, returning how many were removed.
    fn delete(
        &self,
        collection: &str,
        filter: &RecordFilter,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Fetch matching rows without vectors.
    fn query(
        &self,
        collection: &str,
        filter: &RecordFilter,
        fields: FieldSelection<'_>,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<VectorRow>, StoreError>> + Send;

    /// Nearest rows to `vector`, best first.
    fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &RecordFilter,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredRow>, StoreError>> + Send;

    fn count(
        &self,
        collection: &str,
        filter: &RecordFilter,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;
}

/// Keep only the selected payload keys.
pub fn project_payload(
    payload: &Map<String, Value>,
    fields: FieldSelection<'_>,
) -> Map<String, Value> {
    match fields {
        None => payload.clone(),
        Some(keys) => payload
            .iter()
            .filter(|(k, _)| keys.iter().any(|wanted| wanted == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// Sort hits best-first, drop those under the threshold, cap at `limit`.
pub fn finalize_hits(
    mut hits: Vec<ScoredRow>,
    limit: usize,
    similarity_threshold: Option<f32>,
) -> Vec<ScoredRow> {
    if let Some(threshold) = similarity_threshold {
        hits.retain(|hit| hit.similarity >= threshold);
    }
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, similarity: f32) -> ScoredRow {
        ScoredRow {
            row: VectorRow {
                id: id.into(),
                vector: Vec::new(),
                payload: Map::new(),
            },
            similarity,
        }
    }

    #[test]
    fn finalize_sorts_filters_and_truncates() {
        let hits = vec![hit("a", 0.2), hit("b", 0.9), hit("c", 0.6), hit("d", 0.7)];
        let out = finalize_hits(hits, 2, Some(0.5));
        let ids: Vec<_> = out.iter().map(|h| h.row.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn project_payload_keeps_selected_keys() {
        let payload = json!({"content": "x", "user_id": "u", "details": {}})
            .as_object()
            .cloned()
            .unwrap();
        let keys = vec!["content".to_string()];
        let projected = project_payload(&payload, Some(&keys));
        assert_eq!(projected.len(), 1);
        assert_eq!(project_payload(&payload, None).len(), 3);
    }
}
