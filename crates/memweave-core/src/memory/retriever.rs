//! Candidate retrieval for a batch of facts.

use std::collections::HashMap;
use std::sync::Arc;

use memweave_types::memory::{Fact, ScoredRecord};

use super::box_embedder::BoxEmbedder;
use super::store::MemoryStore;

pub const DEFAULT_TOP_K: usize = 3;

/// Candidates for one batch plus the fact embeddings computed on the way.
#[derive(Debug, Default)]
pub struct Retrieval {
    /// Deduplicated by record id, best similarity first.
    pub candidates: Vec<ScoredRecord>,
    /// Embedding per fact text, reused when an ADD stores the same text.
    pub embeddings: HashMap<String, Vec<f32>>,
    /// Facts whose embedding or search failed.
    pub failed_facts: usize,
}

pub struct SimilarityRetriever {
    embedder: Arc<BoxEmbedder>,
    store: Arc<MemoryStore>,
    top_k: usize,
    similarity_threshold: Option<f32>,
}

impl SimilarityRetriever {
    pub fn new(embedder: Arc<BoxEmbedder>, store: Arc<MemoryStore>) -> Self {
        Self {
            embedder,
            store,
            top_k: DEFAULT_TOP_K,
            similarity_threshold: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_threshold(mut self, similarity_threshold: Option<f32>) -> Self {
        self.similarity_threshold = similarity_threshold;
        self
    }

    /// Search the user's namespace once per fact.
    ///
    /// A fact whose embedding or search fails contributes no candidates;
    /// the rest of the batch is unaffected.
    #[tracing::instrument(
        name = "retriever.retrieve",
        skip_all,
        fields(user_id = %user_id, facts = facts.len())
    )]
    pub async fn retrieve(&self, user_id: &str, facts: &[Fact]) -> Retrieval {
        let mut retrieval = Retrieval::default();
        let mut best: HashMap<String, ScoredRecord> = HashMap::new();

        for fact in facts {
            let vector = match self.embedder.embed_one(&fact.text).await {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        fact = %fact.text,
                        "embedding failed; fact gets no candidates"
                    );
                    retrieval.failed_facts += 1;
                    continue;
                }
            };

            let hits = self
                .store
                .search(user_id, &vector, self.top_k, self.similarity_threshold)
                .await;
            retrieval.embeddings.insert(fact.text.clone(), vector);

            let hits = match hits {
                Ok(hits) => hits,
                Err(err) => {
                    tracing::warn!(error = %err, fact = %fact.text, "memory search failed");
                    retrieval.failed_facts += 1;
                    continue;
                }
            };

            for hit in hits {
                match best.get(&hit.record.id) {
                    Some(existing) if existing.similarity >= hit.similarity => {}
                    _ => {
                        best.insert(hit.record.id.clone(), hit);
                    }
                }
            }
        }

        let mut candidates: Vec<ScoredRecord> = best.into_values().collect();
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        retrieval.candidates = candidates;
        retrieval
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::testing::HashEmbedder;
    use crate::vector::box_store::BoxVectorStore;
    use crate::vector::in_memory::InMemoryVectorStore;
    use memweave_types::memory::{MemoryRecord, MemoryType};

    const DIM: usize = 32;

    async fn setup(
        embedder: HashEmbedder,
    ) -> (SimilarityRetriever, Arc<MemoryStore>, Arc<BoxEmbedder>) {
        let backend = Arc::new(BoxVectorStore::new(InMemoryVectorStore::new()));
        let store = Arc::new(MemoryStore::new(backend, "memories", DIM));
        store.ensure_collection().await.unwrap();
        let embedder = Arc::new(BoxEmbedder::new(embedder));
        let retriever = SimilarityRetriever::new(embedder.clone(), store.clone()).with_top_k(3);
        (retriever, store, embedder)
    }

    async fn seed(store: &MemoryStore, embedder: &BoxEmbedder, id: &str, user: &str, text: &str) {
        let now = Utc::now();
        store
            .insert(&MemoryRecord {
                id: id.into(),
                user_id: user.into(),
                content: text.into(),
                embedding: embedder.embed_one(text).await.unwrap(),
                memory_type: MemoryType::Semantic,
                created_at: now,
                updated_at: now,
                details: BTreeMap::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn candidates_are_deduplicated_and_sorted() {
        let (retriever, store, embedder) = setup(HashEmbedder::new(DIM)).await;
        seed(&store, &embedder, "tea", "u1", "user likes green tea").await;
        seed(&store, &embedder, "dog", "u1", "user has a dog named rex").await;
        seed(&store, &embedder, "other", "u2", "user likes green tea").await;

        let facts = vec![
            Fact::new("user likes green tea", vec![], "Unknown"),
            Fact::new("user likes tea", vec![], "Unknown"),
        ];
        let out = retriever.retrieve("u1", &facts).await;

        let ids: Vec<_> = out.candidates.iter().map(|c| c.record.id.as_str()).collect();
        assert_eq!(ids.iter().filter(|id| **id == "tea").count(), 1);
        assert!(!ids.contains(&"other"));
        assert_eq!(ids[0], "tea");
        assert!(out.candidates.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(out.embeddings.len(), 2);
    }

    #[tokio::test]
    async fn embedding_failure_is_isolated_to_one_fact() {
        let (retriever, store, embedder) = setup(HashEmbedder::failing_on(DIM, "poison")).await;
        seed(&store, &embedder, "tea", "u1", "user likes green tea").await;

        let facts = vec![
            Fact::new("poison fact", vec![], "Unknown"),
            Fact::new("user likes green tea", vec![], "Unknown"),
        ];
        let out = retriever.retrieve("u1", &facts).await;
        assert_eq!(out.failed_facts, 1);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].record.id, "tea");
    }
}
