//! Qdrant-backed [`VectorStore`] over the REST API.
//!
//! Collections use cosine distance, so Qdrant's native score is already a
//! similarity. Every mutation is sent with `?wait=true`, which makes Qdrant
//! reply only after the change is applied and searchable. Point ids must be
//! UUIDs (or unsigned integers); memweave record ids are UUID v7.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use memweave_core::vector::filter::{ID_FIELD, RecordFilter};
use memweave_core::vector::store::{
    CollectionSpec, FieldSelection, ScoredRow, VectorRow, VectorStore, finalize_hits,
};
use memweave_types::error::StoreError;

/// Page size for scroll requests.
const SCROLL_PAGE: usize = 256;

/// Envelope every Qdrant response is wrapped in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<Point>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Point {
    id: Value,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
    #[serde(default)]
    score: Option<f32>,
}

impl Point {
    fn into_row(self) -> VectorRow {
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        VectorRow {
            id,
            vector: Vec::new(),
            payload: self.payload.unwrap_or_default(),
        }
    }
}

/// Qdrant `must` conditions for a filter.
fn conditions(filter: &RecordFilter, out: &mut Vec<Value>) {
    match filter {
        RecordFilter::All => {}
        RecordFilter::Eq { field, value } if field == ID_FIELD => {
            out.push(json!({"has_id": [value]}));
        }
        RecordFilter::Eq { field, value } => {
            out.push(json!({"key": field, "match": {"value": value}}));
        }
        RecordFilter::In { field, values } if field == ID_FIELD => {
            out.push(json!({"has_id": values}));
        }
        RecordFilter::In { field, values } => {
            out.push(json!({"key": field, "match": {"any": values}}));
        }
        RecordFilter::And(parts) => {
            for part in parts {
                conditions(part, out);
            }
        }
    }
}

/// Translate a filter to a Qdrant filter object.
pub fn to_qdrant_filter(filter: &RecordFilter) -> Value {
    let mut must = Vec::new();
    conditions(filter, &mut must);
    json!({ "must": must })
}

/// Qdrant vector store client. Does NOT derive Debug (holds the API key).
pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl QdrantVectorStore {
    /// `timeout` bounds each HTTP request end to end.
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request; `collection` names the target for 404 mapping.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        collection: &str,
    ) -> Result<reqwest::Response, StoreError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                StoreError::Unavailable(e.to_string())
            } else {
                StoreError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::MissingCollection(collection.to_string()),
            StatusCode::CONFLICT => StoreError::Conflict(body),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                StoreError::Unavailable(body)
            }
            _ => StoreError::Query(format!("HTTP {status}: {body}")),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        collection: &str,
    ) -> Result<T, StoreError> {
        let response = self.send(method, path, body, collection).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| StoreError::Query(format!("failed to parse Qdrant response: {e}")))?;
        Ok(envelope.result)
    }

    async fn put_points(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        let points: Vec<Value> = rows
            .into_iter()
            .map(|row| json!({"id": row.id, "vector": row.vector, "payload": row.payload}))
            .collect();
        self.send(
            Method::PUT,
            &format!("/collections/{collection}/points?wait=true"),
            Some(json!({ "points": points })),
            collection,
        )
        .await?;
        Ok(())
    }
}

impl VectorStore for QdrantVectorStore {
    fn backend_name(&self) -> &str {
        "qdrant"
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        if self.has_collection(&spec.name).await? {
            return Ok(());
        }
        let name = spec.name.as_str();
        self.send(
            Method::PUT,
            &format!("/collections/{name}"),
            Some(json!({"vectors": {"size": spec.dimension, "distance": "Cosine"}})),
            name,
        )
        .await?;
        for field in &spec.indexed_fields {
            self.send(
                Method::PUT,
                &format!("/collections/{name}/index?wait=true"),
                Some(json!({"field_name": field, "field_schema": "keyword"})),
                name,
            )
            .await?;
        }
        tracing::info!(collection = name, dimension = spec.dimension, "created qdrant collection");
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        match self
            .send(Method::GET, &format!("/collections/{name}"), None, name)
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::MissingCollection(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        match self
            .send(Method::DELETE, &format!("/collections/{name}"), None, name)
            .await
        {
            Ok(_) | Err(StoreError::MissingCollection(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Qdrant serves collections as soon as they exist.
    async fn load_collection(&self, name: &str) -> Result<(), StoreError> {
        if self.has_collection(name).await? {
            Ok(())
        } else {
            Err(StoreError::MissingCollection(name.to_string()))
        }
    }

    async fn insert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let existing: Vec<Point> = self
            .call(
                Method::POST,
                &format!("/collections/{collection}/points"),
                Some(json!({"ids": ids, "with_payload": false, "with_vector": false})),
                collection,
            )
            .await?;
        if !existing.is_empty() {
            return Err(StoreError::Conflict(format!(
                "{} id(s) already exist in '{collection}'",
                existing.len()
            )));
        }
        self.put_points(collection, rows).await
    }

    async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.put_points(collection, rows).await
    }

    async fn delete(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        let matching = self.count(collection, filter).await?;
        if matching == 0 {
            return Ok(0);
        }
        self.send(
            Method::POST,
            &format!("/collections/{collection}/points/delete?wait=true"),
            Some(json!({ "filter": to_qdrant_filter(filter) })),
            collection,
        )
        .await?;
        Ok(matching)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &RecordFilter,
        fields: FieldSelection<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRow>, StoreError> {
        let with_payload = match fields {
            None => json!(true),
            Some(keys) => json!(keys),
        };
        let mut rows = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let page = limit.map_or(SCROLL_PAGE, |l| l.saturating_sub(rows.len()).min(SCROLL_PAGE));
            if page == 0 {
                break;
            }
            let mut body = json!({
                "filter": to_qdrant_filter(filter),
                "limit": page,
                "with_payload": with_payload,
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let result: ScrollResult = self
                .call(
                    Method::POST,
                    &format!("/collections/{collection}/points/scroll"),
                    Some(body),
                    collection,
                )
                .await?;
            rows.extend(result.points.into_iter().map(Point::into_row));

            match result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
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
        let mut body = json!({
            "vector": vector,
            "filter": to_qdrant_filter(filter),
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = similarity_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let points: Vec<Point> = self
            .call(
                Method::POST,
                &format!("/collections/{collection}/points/search"),
                Some(body),
                collection,
            )
            .await?;

        let hits = points
            .into_iter()
            .map(|point| {
                let similarity = point.score.unwrap_or(0.0);
                ScoredRow {
                    row: point.into_row(),
                    similarity,
                }
            })
            .collect();
        Ok(finalize_hits(hits, limit, similarity_threshold))
    }

    async fn count(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        let result: CountResult = self
            .call(
                Method::POST,
                &format!("/collections/{collection}/points/count"),
                Some(json!({"filter": to_qdrant_filter(filter), "exact": true})),
                collection,
            )
            .await?;
        Ok(result.count)
    }
}
