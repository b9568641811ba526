//! LanceDB-backed [`VectorStore`].
//!
//! One table per collection, with a fixed layout:
//!
//! | column            | type                          |
//! |-------------------|-------------------------------|
//! | `id`              | Utf8                          |
//! | each indexed key  | Utf8 (nullable)               |
//! | `payload`         | Utf8 (full payload as JSON)   |
//! | `vector`          | FixedSizeList<Float32, dim>   |
//!
//! Filters compile to SQL predicates over `id` and the indexed columns.
//! Searches use cosine distance; similarity is reported as `1 - distance`.
//! LanceDB commits each write before returning, so mutations are visible to
//! the next read without an explicit flush.
//!
//! Arrow versions MUST match lancedb's transitive dependency (57.3 for lancedb 0.26).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use dashmap::DashMap;
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde_json::{Map, Value};

use memweave_core::vector::filter::{ID_FIELD, RecordFilter};
use memweave_core::vector::store::{
    CollectionSpec, FieldSelection, ScoredRow, VectorRow, VectorStore, finalize_hits,
    project_payload,
};
use memweave_types::error::StoreError;

const PAYLOAD_COLUMN: &str = "payload";
const VECTOR_COLUMN: &str = "vector";
const DISTANCE_COLUMN: &str = "_distance";

/// Arrow schema for a collection table.
pub fn collection_schema(spec: &CollectionSpec) -> Schema {
    let mut fields = vec![Field::new(ID_FIELD, DataType::Utf8, false)];
    fields.extend(
        spec.indexed_fields
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Utf8, true)),
    );
    fields.push(Field::new(PAYLOAD_COLUMN, DataType::Utf8, false));
    fields.push(Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            spec.dimension as i32,
        ),
        false,
    ));
    Schema::new(fields)
}

/// Recover the collection layout from an existing table's schema.
fn spec_from_schema(name: &str, schema: &Schema) -> Result<CollectionSpec, StoreError> {
    let dimension = match schema.field_with_name(VECTOR_COLUMN).map(|f| f.data_type()) {
        Ok(DataType::FixedSizeList(_, size)) => *size as usize,
        _ => {
            return Err(StoreError::Query(format!(
                "table '{name}' has no fixed-size vector column"
            )));
        }
    };
    let indexed_fields = schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|n| n != ID_FIELD && n != PAYLOAD_COLUMN && n != VECTOR_COLUMN)
        .collect();
    Ok(CollectionSpec {
        name: name.to_string(),
        dimension,
        indexed_fields,
    })
}

/// Quote a string literal for a Lance SQL predicate.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Compile a filter to a SQL predicate. `None` means "every row".
pub fn to_predicate(
    filter: &RecordFilter,
    spec: &CollectionSpec,
) -> Result<Option<String>, StoreError> {
    for field in filter.fields() {
        if field != ID_FIELD && !spec.indexed_fields.iter().any(|f| f == field) {
            return Err(StoreError::Query(format!(
                "field '{field}' is not indexed in '{}'",
                spec.name
            )));
        }
    }
    Ok(compile(filter))
}

fn compile(filter: &RecordFilter) -> Option<String> {
    match filter {
        RecordFilter::All => None,
        RecordFilter::Eq { field, value } => Some(format!("{field} = {}", quote(value))),
        RecordFilter::In { values, .. } if values.is_empty() => Some("1 = 0".to_string()),
        RecordFilter::In { field, values } => {
            let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
            Some(format!("{field} IN ({})", list.join(", ")))
        }
        RecordFilter::And(parts) => {
            let clauses: Vec<String> = parts
                .iter()
                .filter_map(compile)
                .map(|c| format!("({c})"))
                .collect();
            if clauses.is_empty() {
                None
            } else {
                Some(clauses.join(" AND "))
            }
        }
    }
}

fn query_error(context: &str) -> impl Fn(lancedb::Error) -> StoreError + '_ {
    move |e| StoreError::Query(format!("{context}: {e}"))
}

struct OpenTable {
    table: lancedb::Table,
    spec: CollectionSpec,
}

/// LanceDB vector store rooted at a filesystem directory.
pub struct LanceVectorStore {
    db: lancedb::Connection,
    base_path: PathBuf,
    tables: DashMap<String, Arc<OpenTable>>,
}

impl LanceVectorStore {
    /// Open or create a LanceDB database at the given path.
    ///
    /// Creates the directory if it does not exist.
    pub async fn new(base_path: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&base_path).map_err(|e| {
            StoreError::Connection(format!("cannot create {}: {e}", base_path.display()))
        })?;

        let uri = base_path.to_str().ok_or_else(|| {
            StoreError::Connection(format!(
                "path contains invalid UTF-8: {}",
                base_path.display()
            ))
        })?;

        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            db,
            base_path,
            tables: DashMap::new(),
        })
    }

    /// Default location: `~/.memweave/vector_store`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".memweave")
            .join("vector_store")
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Cached handle for `name`, opening the table on first use.
    async fn open(&self, name: &str) -> Result<Arc<OpenTable>, StoreError> {
        if let Some(open) = self.tables.get(name) {
            return Ok(Arc::clone(open.value()));
        }

        let table = match self.db.open_table(name).execute().await {
            Ok(table) => table,
            Err(lancedb::Error::TableNotFound { .. }) => {
                return Err(StoreError::MissingCollection(name.to_string()));
            }
            Err(e) => return Err(StoreError::Query(format!("failed to open '{name}': {e}"))),
        };
        let schema = table
            .schema()
            .await
            .map_err(query_error("failed to read table schema"))?;
        let spec = spec_from_schema(name, &schema)?;

        let open = Arc::new(OpenTable { table, spec });
        self.tables.insert(name.to_string(), Arc::clone(&open));
        Ok(open)
    }

    /// Build one Arrow batch from rows, validating every vector length.
    fn build_record_batch(
        spec: &CollectionSpec,
        rows: &[VectorRow],
    ) -> Result<RecordBatch, StoreError> {
        let schema = Arc::new(collection_schema(spec));
        let dimension = spec.dimension;

        if let Some(bad) = rows.iter().find(|r| r.vector.len() != dimension) {
            return Err(StoreError::Query(format!(
                "row '{}' has {} dimensions, collection expects {dimension}",
                bad.id,
                bad.vector.len()
            )));
        }

        let mut columns: Vec<Arc<dyn Array>> = Vec::with_capacity(spec.indexed_fields.len() + 3);
        columns.push(Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.id.as_str()),
        )));
        for field in &spec.indexed_fields {
            let values: StringArray = rows
                .iter()
                .map(|r| {
                    r.payload.get(field).map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect();
            columns.push(Arc::new(values));
        }

        let payloads = rows
            .iter()
            .map(|r| serde_json::to_string(&r.payload))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Query(format!("failed to encode payload: {e}")))?;
        columns.push(Arc::new(StringArray::from(payloads)));

        let values =
            Float32Array::from_iter_values(rows.iter().flat_map(|r| r.vector.iter().copied()));
        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(item, dimension as i32, Arc::new(values), None)
            .map_err(|e| StoreError::Query(format!("failed to build vector column: {e}")))?;
        columns.push(Arc::new(vectors));

        RecordBatch::try_new(schema, columns)
            .map_err(|e| StoreError::Query(format!("failed to build record batch: {e}")))
    }

    /// Parse rows (without vectors) out of a result batch.
    fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<VectorRow>, StoreError> {
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| StoreError::Query(format!("result is missing the '{name}' column")))
        };
        let ids = column(ID_FIELD)?;
        let payloads = column(PAYLOAD_COLUMN)?;

        (0..batch.num_rows())
            .map(|i| {
                let payload: Map<String, Value> = serde_json::from_str(payloads.value(i))
                    .map_err(|e| {
                        StoreError::Query(format!("corrupt payload for '{}': {e}", ids.value(i)))
                    })?;
                Ok(VectorRow {
                    id: ids.value(i).to_string(),
                    vector: Vec::new(),
                    payload,
                })
            })
            .collect()
    }

    async fn append(&self, open: &OpenTable, rows: &[VectorRow]) -> Result<(), StoreError> {
        let batch = Self::build_record_batch(&open.spec, rows)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        open.table
            .add(reader)
            .execute()
            .await
            .map_err(query_error("failed to add rows"))?;
        Ok(())
    }

    fn ids_predicate(rows: &[VectorRow]) -> Option<String> {
        let ids = rows.iter().map(|r| r.id.clone()).collect();
        compile(&RecordFilter::any_of(ID_FIELD, ids))
    }
}

impl VectorStore for LanceVectorStore {
    fn backend_name(&self) -> &str {
        "lance"
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        match self.open(&spec.name).await {
            Ok(existing) => {
                if existing.spec.dimension != spec.dimension {
                    return Err(StoreError::Conflict(format!(
                        "collection '{}' exists with dimension {}, requested {}",
                        spec.name, existing.spec.dimension, spec.dimension
                    )));
                }
                Ok(())
            }
            Err(StoreError::MissingCollection(_)) => {
                let table = self
                    .db
                    .create_empty_table(&spec.name, Arc::new(collection_schema(spec)))
                    .execute()
                    .await
                    .map_err(query_error("failed to create table"))?;
                tracing::info!(
                    collection = %spec.name,
                    dimension = spec.dimension,
                    "created lance table"
                );
                self.tables.insert(
                    spec.name.clone(),
                    Arc::new(OpenTable {
                        table,
                        spec: spec.clone(),
                    }),
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(query_error("failed to list tables"))?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.tables.remove(name);
        match self.db.drop_table(name, &[]).await {
            Ok(()) | Err(lancedb::Error::TableNotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::Query(format!("failed to drop '{name}': {e}"))),
        }
    }

    async fn load_collection(&self, name: &str) -> Result<(), StoreError> {
        self.open(name).await.map(|_| ())
    }

    async fn insert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let open = self.open(collection).await?;
        let existing = open
            .table
            .count_rows(Self::ids_predicate(&rows))
            .await
            .map_err(query_error("failed to check ids"))?;
        if existing > 0 {
            return Err(StoreError::Conflict(format!(
                "{existing} id(s) already exist in '{collection}'"
            )));
        }
        self.append(&open, &rows).await
    }

    /// Merge keyed on `id`: matched rows are rewritten, the rest appended.
    /// One commit; a failed upsert leaves existing rows untouched.
    async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let open = self.open(collection).await?;
        let batch = Self::build_record_batch(&open.spec, &rows)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge = open.table.merge_insert(&[ID_FIELD]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(query_error("failed to upsert rows"))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        let open = self.open(collection).await?;
        let predicate = to_predicate(filter, &open.spec)?;
        let matching = open
            .table
            .count_rows(predicate.clone())
            .await
            .map_err(query_error("failed to count rows before delete"))?;
        if matching == 0 {
            return Ok(0);
        }
        open.table
            .delete(predicate.as_deref().unwrap_or("true"))
            .await
            .map_err(query_error("failed to delete rows"))?;
        Ok(matching as u64)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &RecordFilter,
        fields: FieldSelection<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRow>, StoreError> {
        let open = self.open(collection).await?;
        let mut query = open.table.query();
        if let Some(predicate) = to_predicate(filter, &open.spec)? {
            query = query.only_if(predicate);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(query_error("query failed"))?
            .try_collect()
            .await
            .map_err(query_error("failed to collect query results"))?;

        let mut rows = Vec::new();
        for batch in &batches {
            rows.extend(Self::batch_to_rows(batch)?);
        }
        for row in &mut rows {
            row.payload = project_payload(&row.payload, fields);
        }
        Ok(rows)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &RecordFilter,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        let open = self.open(collection).await?;
        if vector.len() != open.spec.dimension {
            return Err(StoreError::Query(format!(
                "query vector has {} dimensions, collection expects {}",
                vector.len(),
                open.spec.dimension
            )));
        }

        let mut search = open
            .table
            .vector_search(vector)
            .map_err(query_error("vector search setup failed"))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit);
        if let Some(predicate) = to_predicate(filter, &open.spec)? {
            search = search.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .map_err(query_error("vector search failed"))?
            .try_collect()
            .await
            .map_err(query_error("failed to collect search results"))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for (i, row) in Self::batch_to_rows(batch)?.into_iter().enumerate() {
                let distance = distances.map_or(0.0, |d| d.value(i));
                hits.push(ScoredRow {
                    row,
                    similarity: 1.0 - distance,
                });
            }
        }
        Ok(finalize_hits(hits, limit, similarity_threshold))
    }

    async fn count(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        let open = self.open(collection).await?;
        let predicate = to_predicate(filter, &open.spec)?;
        let count = open
            .table
            .count_rows(predicate)
            .await
            .map_err(query_error("failed to count rows"))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(dimension: usize) -> CollectionSpec {
        CollectionSpec {
            name: "memories".into(),
            dimension,
            indexed_fields: vec!["user_id".into()],
        }
    }

    fn row(id: &str, user: &str, vector: Vec<f32>) -> VectorRow {
        VectorRow {
            id: id.into(),
            vector,
            payload: json!({"user_id": user, "content": format!("fact {id}")})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    async fn store() -> (tempfile::TempDir, LanceVectorStore) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LanceVectorStore::new(temp_dir.path().to_path_buf())
            .await
            .expect("Failed to create vector store");
        store.create_collection(&spec(3)).await.unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_schema_layout() {
        let schema = collection_schema(&spec(384));
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["id", "user_id", "payload", "vector"]);
        let recovered = spec_from_schema("memories", &schema).unwrap();
        assert_eq!(recovered, spec(384));
    }

    #[test]
    fn test_predicate_compilation() {
        let s = spec(3);
        let filter = RecordFilter::eq("user_id", "o'brien").and(RecordFilter::any_of(
            ID_FIELD,
            vec!["a".into(), "b".into()],
        ));
        assert_eq!(
            to_predicate(&filter, &s).unwrap().as_deref(),
            Some("(user_id = 'o''brien') AND (id IN ('a', 'b'))")
        );
        assert_eq!(to_predicate(&RecordFilter::All, &s).unwrap(), None);
        assert!(matches!(
            to_predicate(&RecordFilter::eq("content", "x"), &s),
            Err(StoreError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_drop_too() {
        let (_dir, store) = store().await;
        store.create_collection(&spec(3)).await.unwrap();
        assert!(store.has_collection("memories").await.unwrap());

        store.drop_collection("memories").await.unwrap();
        assert!(!store.has_collection("memories").await.unwrap());
        store.drop_collection("memories").await.unwrap();
        assert!(matches!(
            store.load_collection("memories").await,
            Err(StoreError::MissingCollection(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_search_and_scope() {
        let (_dir, store) = store().await;
        store
            .insert(
                "memories",
                vec![
                    row("a", "u1", vec![1.0, 0.0, 0.0]),
                    row("b", "u1", vec![0.0, 1.0, 0.0]),
                    row("c", "u2", vec![1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("memories", &[1.0, 0.0, 0.0], &RecordFilter::eq("user_id", "u1"), 5, None)
            .await
            .unwrap();
        assert_eq!(hits[0].row.id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-4);
        assert!(hits.iter().all(|h| h.row.payload["user_id"] == "u1"));

        let close = store
            .search("memories", &[1.0, 0.0, 0.0], &RecordFilter::eq("user_id", "u1"), 5, Some(0.5))
            .await
            .unwrap();
        assert_eq!(close.len(), 1);

        assert!(matches!(
            store.insert("memories", vec![row("a", "u1", vec![0.0, 0.0, 1.0])]).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_counts() {
        let (_dir, store) = store().await;
        store
            .insert("memories", vec![row("a", "u1", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let mut replaced = row("a", "u1", vec![0.0, 1.0, 0.0]);
        replaced.payload.insert("content".into(), json!("updated"));
        store.upsert("memories", vec![replaced]).await.unwrap();

        let rows = store
            .query("memories", &RecordFilter::id("a"), None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload["content"], "updated");

        assert_eq!(store.delete("memories", &RecordFilter::id("a")).await.unwrap(), 1);
        assert_eq!(store.delete("memories", &RecordFilter::id("a")).await.unwrap(), 0);
        assert_eq!(store.count("memories", &RecordFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_upsert_keeps_existing_row() {
        let (_dir, store) = store().await;
        store
            .insert("memories", vec![row("a", "u1", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let result = store
            .upsert("memories", vec![row("a", "u1", vec![1.0])])
            .await;
        assert!(matches!(result, Err(StoreError::Query(_))));

        assert_eq!(store.count("memories", &RecordFilter::All).await.unwrap(), 1);
        let rows = store
            .query("memories", &RecordFilter::id("a"), None, None)
            .await
            .unwrap();
        assert_eq!(rows[0].payload["content"], "fact a");
    }

    #[tokio::test]
    async fn test_upsert_inserts_unknown_ids() {
        let (_dir, store) = store().await;
        store
            .upsert("memories", vec![row("b", "u2", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(
            store.count("memories", &RecordFilter::eq("user_id", "u2")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_reopen_recovers_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let store = LanceVectorStore::new(temp_dir.path().to_path_buf()).await.unwrap();
            store.create_collection(&spec(3)).await.unwrap();
            store
                .insert("memories", vec![row("a", "u1", vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }
        let store = LanceVectorStore::new(temp_dir.path().to_path_buf()).await.unwrap();
        store.load_collection("memories").await.unwrap();
        assert_eq!(
            store.count("memories", &RecordFilter::eq("user_id", "u1")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.insert("memories", vec![row("a", "u1", vec![1.0])]).await,
            Err(StoreError::Query(_))
        ));
    }
}
