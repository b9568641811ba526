//! In-process vector store backed by `DashMap`.
//!
//! Cosine similarity over a brute-force scan. Mutations are visible as soon
//! as the call returns. Used by tests and `--backend memory` dry runs.

use std::collections::BTreeMap;

use dashmap::DashMap;

use memweave_types::error::StoreError;

use super::filter::RecordFilter;
use super::store::{
    CollectionSpec, FieldSelection, ScoredRow, VectorRow, VectorStore, finalize_hits,
    project_payload,
};

struct MemCollection {
    dimension: usize,
    rows: BTreeMap<String, VectorRow>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: DashMap<String, MemCollection>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_dimension(collection: &MemCollection, rows: &[VectorRow]) -> Result<(), StoreError> {
        match rows.iter().find(|r| r.vector.len() != collection.dimension) {
            Some(bad) => Err(StoreError::Query(format!(
                "row '{}' has dimension {}, collection expects {}",
                bad.id,
                bad.vector.len(),
                collection.dimension
            ))),
            None => Ok(()),
        }
    }
}

/// Cosine similarity; zero vectors are similar to nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorStore for InMemoryVectorStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        self.collections
            .entry(spec.name.clone())
            .or_insert_with(|| MemCollection {
                dimension: spec.dimension,
                rows: BTreeMap::new(),
            });
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.contains_key(name))
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections.remove(name);
        Ok(())
    }

    async fn load_collection(&self, name: &str) -> Result<(), StoreError> {
        // Rows are always resident; loading only checks existence.
        if self.collections.contains_key(name) {
            Ok(())
        } else {
            Err(StoreError::MissingCollection(name.to_string()))
        }
    }

    async fn insert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        let mut coll = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;
        Self::check_dimension(&coll, &rows)?;
        if let Some(dup) = rows.iter().find(|r| coll.rows.contains_key(&r.id)) {
            return Err(StoreError::Conflict(format!("id '{}' already exists", dup.id)));
        }
        for row in rows {
            coll.rows.insert(row.id.clone(), row);
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        let mut coll = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;
        Self::check_dimension(&coll, &rows)?;
        for row in rows {
            coll.rows.insert(row.id.clone(), row);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        let mut coll = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;
        let before = coll.rows.len();
        coll.rows.retain(|id, row| !filter.matches(id, &row.payload));
        Ok((before - coll.rows.len()) as u64)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &RecordFilter,
        fields: FieldSelection<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRow>, StoreError> {
        let coll = self
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;
        Ok(coll
            .rows
            .values()
            .filter(|row| filter.matches(&row.id, &row.payload))
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| VectorRow {
                id: row.id.clone(),
                vector: Vec::new(),
                payload: project_payload(&row.payload, fields),
            })
            .collect())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &RecordFilter,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        let coll = self
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;
        if vector.len() != coll.dimension {
            return Err(StoreError::Query(format!(
                "query vector has dimension {}, collection expects {}",
                vector.len(),
                coll.dimension
            )));
        }
        let hits = coll
            .rows
            .values()
            .filter(|row| filter.matches(&row.id, &row.payload))
            .map(|row| ScoredRow {
                similarity: cosine_similarity(vector, &row.vector),
                row: row.clone(),
            })
            .collect();
        Ok(finalize_hits(hits, limit, similarity_threshold))
    }

    async fn count(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        let coll = self
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;
        Ok(coll
            .rows
            .values()
            .filter(|row| filter.matches(&row.id, &row.payload))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn spec() -> CollectionSpec {
        CollectionSpec {
            name: "mem".into(),
            dimension: 3,
            indexed_fields: vec!["user_id".into()],
        }
    }

    fn row(id: &str, user: &str, vector: Vec<f32>) -> VectorRow {
        let payload: Map<String, Value> = json!({"user_id": user, "content": id})
            .as_object()
            .cloned()
            .unwrap();
        VectorRow {
            id: id.into(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let store = InMemoryVectorStore::new();
        assert!(!store.has_collection("mem").await.unwrap());
        store.create_collection(&spec()).await.unwrap();
        store.create_collection(&spec()).await.unwrap();
        store.load_collection("mem").await.unwrap();
        assert!(store.has_collection("mem").await.unwrap());
        store.drop_collection("mem").await.unwrap();
        store.drop_collection("mem").await.unwrap();
        assert!(!store.has_collection("mem").await.unwrap());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids_but_upsert_replaces() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec()).await.unwrap();
        store
            .insert("mem", vec![row("a", "u1", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        let err = store
            .insert("mem", vec![row("a", "u1", vec![0.0, 1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .upsert("mem", vec![row("a", "u2", vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();
        let count = store
            .count("mem", &RecordFilter::eq("user_id", "u2"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn search_is_scoped_sorted_and_thresholded() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec()).await.unwrap();
        store
            .insert(
                "mem",
                vec![
                    row("close", "u1", vec![1.0, 0.1, 0.0]),
                    row("far", "u1", vec![0.0, 0.0, 1.0]),
                    row("other-user", "u2", vec![1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("mem", &[1.0, 0.0, 0.0], &RecordFilter::eq("user_id", "u1"), 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row.id, "close");
        assert!(hits[0].similarity > hits[1].similarity);

        let hits = store
            .search("mem", &[1.0, 0.0, 0.0], &RecordFilter::eq("user_id", "u1"), 5, Some(0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_removed_rows() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec()).await.unwrap();
        store
            .insert("mem", vec![row("a", "u1", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.delete("mem", &RecordFilter::id("missing")).await.unwrap(), 0);
        assert_eq!(store.delete("mem", &RecordFilter::id("a")).await.unwrap(), 1);
        assert_eq!(store.count("mem", &RecordFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec()).await.unwrap();
        let err = store
            .insert("mem", vec![row("a", "u1", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
        assert!(matches!(
            store.count("nope", &RecordFilter::All).await.unwrap_err(),
            StoreError::MissingCollection(_)
        ));
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
