//! Action application: executes validated decisions against the store.
//!
//! Failures are contained per fact. A skipped decision is audited with its
//! reason and counted as NONE, so the counts of a batch always add up to
//! the number of facts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use memweave_types::decision::{
    ActionDecision, AuditOutcome, DecisionAudit, MemoryAction, OperationCounts,
};
use memweave_types::error::SkipReason;
use memweave_types::memory::{Fact, MemoryRecord, MemoryType};

use super::arbiter::FactDecision;
use super::temp_ids::TempIdMapping;
use crate::memory::box_embedder::BoxEmbedder;
use crate::memory::store::MemoryStore;

/// Outcome of applying one batch.
#[derive(Debug, Default)]
pub struct AppliedBatch {
    pub counts: OperationCounts,
    pub audit: Vec<DecisionAudit>,
}

impl AppliedBatch {
    fn applied(
        &mut self,
        fact_index: usize,
        fact_text: &str,
        action: MemoryAction,
        target_id: Option<String>,
        previous_content: Option<String>,
    ) {
        tracing::debug!(
            fact_index,
            %action,
            target_id = target_id.as_deref(),
            "decision applied"
        );
        self.counts.record(action);
        self.audit.push(DecisionAudit {
            fact_index,
            fact_text: fact_text.to_string(),
            action,
            target_id,
            previous_content,
            outcome: AuditOutcome::Applied,
            reason: None,
        });
    }

    fn skipped(
        &mut self,
        fact_index: usize,
        fact_text: &str,
        action: MemoryAction,
        target_id: Option<String>,
        reason: SkipReason,
    ) {
        tracing::warn!(
            fact_index,
            %action,
            target_id = target_id.as_deref(),
            %reason,
            "decision skipped"
        );
        self.counts.record(MemoryAction::None);
        self.audit.push(DecisionAudit {
            fact_index,
            fact_text: fact_text.to_string(),
            action,
            target_id,
            previous_content: None,
            outcome: AuditOutcome::Skipped,
            reason: Some(reason),
        });
    }
}

pub struct ActionApplier {
    embedder: Arc<BoxEmbedder>,
    store: Arc<MemoryStore>,
}

impl ActionApplier {
    pub fn new(embedder: Arc<BoxEmbedder>, store: Arc<MemoryStore>) -> Self {
        Self { embedder, store }
    }

    /// Apply one decision per fact. Store timestamps use `batch_time`.
    #[tracing::instrument(
        name = "applier.apply",
        skip_all,
        fields(user_id = %user_id, decisions = decisions.len())
    )]
    pub async fn apply(
        &self,
        user_id: &str,
        facts: &[Fact],
        decisions: Vec<FactDecision>,
        mapping: &TempIdMapping,
        embeddings: &HashMap<String, Vec<f32>>,
        batch_time: DateTime<Utc>,
    ) -> AppliedBatch {
        let mut batch = AppliedBatch::default();

        for FactDecision { fact_index, decision } in decisions {
            let fact_text = facts
                .get(fact_index)
                .map(|f| f.text.as_str())
                .unwrap_or_default();
            let fact_details = facts
                .get(fact_index)
                .map(Fact::details_map)
                .unwrap_or_default();

            let decision = match decision {
                Ok(decision) => decision,
                Err(reason) => {
                    batch.skipped(fact_index, fact_text, MemoryAction::None, None, reason);
                    continue;
                }
            };

            match decision {
                ActionDecision::None { .. } => {
                    batch.applied(fact_index, fact_text, MemoryAction::None, None, None);
                }
                ActionDecision::Add { text, details } => {
                    let details = merge_details(BTreeMap::new(), fact_details, details);
                    match self
                        .add(user_id, &text, details, embeddings, batch_time)
                        .await
                    {
                        Ok(id) => {
                            batch.applied(fact_index, fact_text, MemoryAction::Add, Some(id), None)
                        }
                        Err(reason) => {
                            batch.skipped(fact_index, fact_text, MemoryAction::Add, None, reason)
                        }
                    }
                }
                ActionDecision::Update {
                    temp_id,
                    text,
                    details,
                } => {
                    let Some(real_id) = mapping.resolve(&temp_id) else {
                        batch.skipped(
                            fact_index,
                            fact_text,
                            MemoryAction::Update,
                            None,
                            SkipReason::UnknownReference(temp_id),
                        );
                        continue;
                    };
                    match self
                        .update(
                            user_id,
                            real_id,
                            &text,
                            fact_details,
                            details,
                            embeddings,
                            batch_time,
                        )
                        .await
                    {
                        Ok(previous) => batch.applied(
                            fact_index,
                            fact_text,
                            MemoryAction::Update,
                            Some(real_id.to_string()),
                            Some(previous),
                        ),
                        Err(reason) => batch.skipped(
                            fact_index,
                            fact_text,
                            MemoryAction::Update,
                            Some(real_id.to_string()),
                            reason,
                        ),
                    }
                }
                ActionDecision::Delete { temp_id, .. } => {
                    let Some(real_id) = mapping.resolve(&temp_id) else {
                        batch.skipped(
                            fact_index,
                            fact_text,
                            MemoryAction::Delete,
                            None,
                            SkipReason::UnknownReference(temp_id),
                        );
                        continue;
                    };
                    let target = Some(real_id.to_string());
                    match self.store.delete(user_id, real_id).await {
                        Ok(true) => {
                            batch.applied(fact_index, fact_text, MemoryAction::Delete, target, None)
                        }
                        Ok(false) => batch.skipped(
                            fact_index,
                            fact_text,
                            MemoryAction::Delete,
                            target,
                            SkipReason::ActionApplyFailure("record already gone".into()),
                        ),
                        Err(err) => batch.skipped(
                            fact_index,
                            fact_text,
                            MemoryAction::Delete,
                            target,
                            err.into(),
                        ),
                    }
                }
            }
        }

        batch
    }

    /// Store every fact as a new record, without arbitration.
    #[tracing::instrument(
        name = "applier.append_all",
        skip_all,
        fields(user_id = %user_id, facts = facts.len())
    )]
    pub async fn append_all(
        &self,
        user_id: &str,
        facts: &[Fact],
        embeddings: &HashMap<String, Vec<f32>>,
        batch_time: DateTime<Utc>,
    ) -> AppliedBatch {
        let mut batch = AppliedBatch::default();
        for (fact_index, fact) in facts.iter().enumerate() {
            match self
                .add(user_id, &fact.text, fact.details_map(), embeddings, batch_time)
                .await
            {
                Ok(id) => {
                    batch.applied(fact_index, &fact.text, MemoryAction::Add, Some(id), None)
                }
                Err(reason) => {
                    batch.skipped(fact_index, &fact.text, MemoryAction::Add, None, reason)
                }
            }
        }
        batch
    }

    /// Reuse the retrieval embedding when the text is unchanged.
    async fn vector_for(
        &self,
        text: &str,
        embeddings: &HashMap<String, Vec<f32>>,
    ) -> Result<Vec<f32>, SkipReason> {
        if let Some(vector) = embeddings.get(text) {
            return Ok(vector.clone());
        }
        Ok(self.embedder.embed_one(text).await?)
    }

    async fn add(
        &self,
        user_id: &str,
        text: &str,
        details: BTreeMap<String, String>,
        embeddings: &HashMap<String, Vec<f32>>,
        batch_time: DateTime<Utc>,
    ) -> Result<String, SkipReason> {
        let embedding = self.vector_for(text, embeddings).await?;
        let record = MemoryRecord {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            content: text.to_string(),
            embedding,
            memory_type: MemoryType::Semantic,
            created_at: batch_time,
            updated_at: batch_time,
            details,
        };
        self.store.insert(&record).await?;
        Ok(record.id)
    }

    /// Rewrite an existing record, returning its previous content.
    #[allow(clippy::too_many_arguments)]
    async fn update(
        &self,
        user_id: &str,
        real_id: &str,
        text: &str,
        fact_details: BTreeMap<String, String>,
        decision_details: BTreeMap<String, String>,
        embeddings: &HashMap<String, Vec<f32>>,
        batch_time: DateTime<Utc>,
    ) -> Result<String, SkipReason> {
        let existing = self
            .store
            .get(user_id, real_id)
            .await?
            .ok_or_else(|| {
                SkipReason::ActionApplyFailure(format!("record '{real_id}' not found"))
            })?;
        let embedding = self.vector_for(text, embeddings).await?;

        let record = MemoryRecord {
            id: existing.id,
            user_id: existing.user_id,
            content: text.to_string(),
            embedding,
            memory_type: existing.memory_type,
            created_at: existing.created_at,
            updated_at: batch_time,
            details: merge_details(existing.details, fact_details, decision_details),
        };
        self.store.upsert(&record).await?;
        Ok(existing.content)
    }
}

/// Later maps win on key collisions.
fn merge_details(
    mut base: BTreeMap<String, String>,
    fact: BTreeMap<String, String>,
    decision: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    base.extend(fact);
    base.extend(decision);
    base
}
