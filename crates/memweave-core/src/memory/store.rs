//! MemoryRecord persistence on top of a `BoxVectorStore`.
//!
//! Maps records to rows (`user_id`, `memory_type` as indexed fields, the
//! rest in the payload) and scopes every call to one user namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use memweave_types::error::StoreError;
use memweave_types::memory::{MemoryRecord, MemoryType, ScoredRecord};

use crate::vector::box_store::BoxVectorStore;
use crate::vector::filter::RecordFilter;
use crate::vector::store::{CollectionSpec, VectorRow};

pub const USER_ID_FIELD: &str = "user_id";
pub const MEMORY_TYPE_FIELD: &str = "memory_type";

pub struct MemoryStore {
    store: Arc<BoxVectorStore>,
    collection: String,
    dimension: usize,
}

impl MemoryStore {
    pub fn new(
        store: Arc<BoxVectorStore>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            dimension,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn backend_name(&self) -> &str {
        self.store.backend_name()
    }

    pub fn spec(&self) -> CollectionSpec {
        CollectionSpec {
            name: self.collection.clone(),
            dimension: self.dimension,
            indexed_fields: vec![USER_ID_FIELD.to_string(), MEMORY_TYPE_FIELD.to_string()],
        }
    }

    /// Create the collection if missing and load it for search.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        if !self.store.has_collection(&self.collection).await? {
            tracing::info!(
                collection = %self.collection,
                backend = self.store.backend_name(),
                dimension = self.dimension,
                "creating memory collection"
            );
            self.store.create_collection(&self.spec()).await?;
        }
        self.store.load_collection(&self.collection).await
    }

    pub async fn drop_collection(&self) -> Result<(), StoreError> {
        self.store.drop_collection(&self.collection).await
    }

    fn user_filter(user_id: &str) -> RecordFilter {
        RecordFilter::eq(USER_ID_FIELD, user_id)
    }

    pub async fn insert(&self, record: &MemoryRecord) -> Result<(), StoreError> {
        self.store
            .insert(&self.collection, vec![record_to_row(record)])
            .await
    }

    pub async fn upsert(&self, record: &MemoryRecord) -> Result<(), StoreError> {
        self.store
            .upsert(&self.collection, vec![record_to_row(record)])
            .await
    }

    /// Fetch one record of `user_id` by id. The embedding is not returned.
    pub async fn get(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let filter = Self::user_filter(user_id).and(RecordFilter::id(id));
        let rows = self
            .store
            .query(&self.collection, &filter, None, Some(1))
            .await?;
        rows.into_iter().next().map(row_to_record).transpose()
    }

    /// Delete one record. Returns `true` only if a row was actually removed.
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let filter = Self::user_filter(user_id).and(RecordFilter::id(id));
        let removed = self.store.delete(&self.collection, &filter).await?;
        Ok(removed > 0)
    }

    pub async fn search(
        &self,
        user_id: &str,
        vector: &[f32],
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let hits = self
            .store
            .search(
                &self.collection,
                vector,
                &Self::user_filter(user_id),
                limit,
                similarity_threshold,
            )
            .await?;

        hits.into_iter()
            .map(|hit| {
                Ok(ScoredRecord {
                    similarity: hit.similarity,
                    record: row_to_record(hit.row)?,
                })
            })
            .collect()
    }

    pub async fn list(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = self
            .store
            .query(&self.collection, &Self::user_filter(user_id), None, limit)
            .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn count(&self, user_id: &str) -> Result<u64, StoreError> {
        self.store
            .count(&self.collection, &Self::user_filter(user_id))
            .await
    }

    /// Remove every record of one user.
    pub async fn clear_user(&self, user_id: &str) -> Result<u64, StoreError> {
        self.store
            .delete(&self.collection, &Self::user_filter(user_id))
            .await
    }
}

pub fn record_to_row(record: &MemoryRecord) -> VectorRow {
    let payload = json!({
        USER_ID_FIELD: record.user_id,
        MEMORY_TYPE_FIELD: record.memory_type.to_string(),
        "content": record.content,
        "created_at": record.created_at.to_rfc3339(),
        "updated_at": record.updated_at.to_rfc3339(),
        "details": record.details,
    });

    VectorRow {
        id: record.id.clone(),
        vector: record.embedding.clone(),
        payload: match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    }
}

pub fn row_to_record(row: VectorRow) -> Result<MemoryRecord, StoreError> {
    let text = |key: &str| -> Result<String, StoreError> {
        row.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Query(format!("row '{}' has no '{key}' field", row.id)))
    };
    let timestamp = |key: &str| -> Result<DateTime<Utc>, StoreError> {
        let raw = text(key)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Query(format!("row '{}' has bad {key} '{raw}': {e}", row.id)))
    };

    let memory_type = text(MEMORY_TYPE_FIELD)?
        .parse::<MemoryType>()
        .map_err(StoreError::Query)?;

    let details: BTreeMap<String, String> = row
        .payload
        .get("details")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(MemoryRecord {
        user_id: text(USER_ID_FIELD)?,
        content: text("content")?,
        memory_type,
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
        details,
        embedding: row.vector,
        id: row.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::in_memory::InMemoryVectorStore;

    fn record(id: &str, user: &str, content: &str, vector: Vec<f32>) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: id.into(),
            user_id: user.into(),
            content: content.into(),
            embedding: vector,
            memory_type: MemoryType::Semantic,
            created_at: now,
            updated_at: now,
            details: BTreeMap::from([("Topic".to_string(), "drinks".to_string())]),
        }
    }

    async fn store() -> MemoryStore {
        let backend = Arc::new(BoxVectorStore::new(InMemoryVectorStore::new()));
        let store = MemoryStore::new(backend, "memories", 2);
        store.ensure_collection().await.unwrap();
        store
    }

    #[test]
    fn row_mapping_preserves_fields() {
        let original = record("r1", "u1", "User likes tea", vec![1.0, 0.0]);
        let restored = row_to_record(record_to_row(&original)).unwrap();
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.content, original.content);
        assert_eq!(restored.details, original.details);
        assert_eq!(restored.created_at, original.created_at);
        assert_eq!(restored.memory_type, MemoryType::Semantic);
    }

    #[test]
    fn row_without_content_is_rejected() {
        let mut row = record_to_row(&record("r1", "u1", "x", vec![1.0, 0.0]));
        row.payload.remove("content");
        assert!(matches!(row_to_record(row), Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn records_are_scoped_by_user() {
        let store = store().await;
        store.insert(&record("a", "u1", "tea", vec![1.0, 0.0])).await.unwrap();
        store.insert(&record("b", "u2", "coffee", vec![1.0, 0.0])).await.unwrap();

        assert_eq!(store.count("u1").await.unwrap(), 1);
        assert!(store.get("u1", "b").await.unwrap().is_none());
        assert_eq!(store.get("u2", "b").await.unwrap().unwrap().content, "coffee");

        let hits = store.search("u1", &[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "a");

        assert!(!store.delete("u1", "b").await.unwrap());
        assert!(store.delete("u2", "b").await.unwrap());
        assert_eq!(store.clear_user("u1").await.unwrap(), 1);
    }
}
