//! BoxVectorStore -- object-safe dynamic dispatch wrapper for VectorStore.
//!
//! Same blanket-impl pattern as BoxLlmProvider and BoxEmbedder. Every call
//! goes through the wrapper's timeout and retry budget; a timed-out call is
//! reported as `Unavailable`.

use std::future::Future;
use std::pin::Pin;

use memweave_types::error::StoreError;

use super::filter::RecordFilter;
use super::store::{CollectionSpec, ScoredRow, VectorRow, VectorStore};
use crate::retry::RetryPolicy;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Object-safe version of [`VectorStore`] with boxed futures.
pub trait VectorStoreDyn: Send + Sync {
    fn backend_name_dyn(&self) -> &str;

    fn create_collection_boxed<'a>(&'a self, spec: &'a CollectionSpec) -> BoxFut<'a, ()>;

    fn has_collection_boxed<'a>(&'a self, name: &'a str) -> BoxFut<'a, bool>;

    fn drop_collection_boxed<'a>(&'a self, name: &'a str) -> BoxFut<'a, ()>;

    fn load_collection_boxed<'a>(&'a self, name: &'a str) -> BoxFut<'a, ()>;

    fn insert_boxed<'a>(&'a self, collection: &'a str, rows: Vec<VectorRow>) -> BoxFut<'a, ()>;

    fn upsert_boxed<'a>(&'a self, collection: &'a str, rows: Vec<VectorRow>) -> BoxFut<'a, ()>;

    fn delete_boxed<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RecordFilter,
    ) -> BoxFut<'a, u64>;

    fn query_boxed<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RecordFilter,
        fields: Option<&'a [String]>,
        limit: Option<usize>,
    ) -> BoxFut<'a, Vec<VectorRow>>;

    fn search_boxed<'a>(
        &'a self,
        collection: &'a str,
        vector: &'a [f32],
        filter: &'a RecordFilter,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> BoxFut<'a, Vec<ScoredRow>>;

    fn count_boxed<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RecordFilter,
    ) -> BoxFut<'a, u64>;
}

impl<T: VectorStore> VectorStoreDyn for T {
    fn backend_name_dyn(&self) -> &str {
        self.backend_name()
    }

    fn create_collection_boxed<'a>(&'a self, spec: &'a CollectionSpec) -> BoxFut<'a, ()> {
        Box::pin(self.create_collection(spec))
    }

    fn has_collection_boxed<'a>(&'a self, name: &'a str) -> BoxFut<'a, bool> {
        Box::pin(self.has_collection(name))
    }

    fn drop_collection_boxed<'a>(&'a self, name: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.drop_collection(name))
    }

    fn load_collection_boxed<'a>(&'a self, name: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.load_collection(name))
    }

    fn insert_boxed<'a>(&'a self, collection: &'a str, rows: Vec<VectorRow>) -> BoxFut<'a, ()> {
        Box::pin(self.insert(collection, rows))
    }

    fn upsert_boxed<'a>(&'a self, collection: &'a str, rows: Vec<VectorRow>) -> BoxFut<'a, ()> {
        Box::pin(self.upsert(collection, rows))
    }

    fn delete_boxed<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RecordFilter,
    ) -> BoxFut<'a, u64> {
        Box::pin(self.delete(collection, filter))
    }

    fn query_boxed<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RecordFilter,
        fields: Option<&'a [String]>,
        limit: Option<usize>,
    ) -> BoxFut<'a, Vec<VectorRow>> {
        Box::pin(self.query(collection, filter, fields, limit))
    }

    fn search_boxed<'a>(
        &'a self,
        collection: &'a str,
        vector: &'a [f32],
        filter: &'a RecordFilter,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> BoxFut<'a, Vec<ScoredRow>> {
        Box::pin(self.search(collection, vector, filter, limit, similarity_threshold))
    }

    fn count_boxed<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RecordFilter,
    ) -> BoxFut<'a, u64> {
        Box::pin(self.count(collection, filter))
    }
}

/// Type-erased vector store for runtime backend selection.
pub struct BoxVectorStore {
    inner: Box<dyn VectorStoreDyn + Send + Sync>,
    policy: RetryPolicy,
}

impl BoxVectorStore {
    /// Single attempt per call until [`with_retry`](Self::with_retry)
    /// installs a budget.
    pub fn new<T: VectorStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
            policy: RetryPolicy::immediate(1),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend_name_dyn()
    }

    /// Run `call` under the per-call timeout, retrying transport failures.
    async fn call<'a, T, F>(&'a self, operation: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> BoxFut<'a, T>,
    {
        let timeout = self.policy.call_timeout;
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(timeout, call())
                .await
                .unwrap_or_else(|_| {
                    Err(StoreError::Unavailable(format!(
                        "{operation} timed out after {}ms",
                        timeout.as_millis()
                    )))
                });
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && self.policy.should_retry(attempt) => {
                    tracing::warn!(
                        error = %err,
                        attempt,
                        operation,
                        backend = self.backend_name(),
                        "store call failed; retrying"
                    );
                    self.policy.wait_after(attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        self.call("create_collection", || self.inner.create_collection_boxed(spec))
            .await
    }

    pub async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        self.call("has_collection", || self.inner.has_collection_boxed(name))
            .await
    }

    pub async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.call("drop_collection", || self.inner.drop_collection_boxed(name))
            .await
    }

    pub async fn load_collection(&self, name: &str) -> Result<(), StoreError> {
        self.call("load_collection", || self.inner.load_collection_boxed(name))
            .await
    }

    pub async fn insert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        self.call("insert", move || {
            self.inner.insert_boxed(collection, rows.clone())
        })
        .await
    }

    pub async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<(), StoreError> {
        self.call("upsert", move || {
            self.inner.upsert_boxed(collection, rows.clone())
        })
        .await
    }

    pub async fn delete(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        self.call("delete", || self.inner.delete_boxed(collection, filter))
            .await
    }

    pub async fn query(
        &self,
        collection: &str,
        filter: &RecordFilter,
        fields: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRow>, StoreError> {
        self.call("query", || {
            self.inner.query_boxed(collection, filter, fields, limit)
        })
        .await
    }

    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &RecordFilter,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.call("search", || {
            self.inner
                .search_boxed(collection, vector, filter, limit, similarity_threshold)
        })
        .await
    }

    pub async fn count(&self, collection: &str, filter: &RecordFilter) -> Result<u64, StoreError> {
        self.call("count", || self.inner.count_boxed(collection, filter))
            .await
    }
}
