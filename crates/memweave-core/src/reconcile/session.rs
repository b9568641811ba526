//! Per-unit reconciliation: the sequential pipeline for one user.
//!
//! Chunks are processed strictly in order and each one is fully reconciled
//! (extract, retrieve, arbitrate, apply, core memory) before the next.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use memweave_types::config::PipelineSettings;
use memweave_types::decision::{DecisionAudit, OperationCounts};
use memweave_types::dialogue::ReconciliationUnit;
use memweave_types::memory::CoreMemorySnapshot;
use memweave_types::run::{ReconcileMode, UnitResult};

use super::applier::{ActionApplier, AppliedBatch};
use super::arbiter::ActionArbiter;
use crate::llm::judgment::JudgmentService;
use crate::memory::box_embedder::BoxEmbedder;
use crate::memory::core_memory::{CoreMemoryUpdate, CoreMemoryUpdater};
use crate::memory::extractor::FactExtractor;
use crate::memory::retriever::SimilarityRetriever;
use crate::memory::store::MemoryStore;
use crate::memory::working::WorkingMemory;

/// Shared, stateless pipeline stages. One instance serves every unit.
pub struct Reconciler {
    extractor: FactExtractor,
    retriever: SimilarityRetriever,
    arbiter: ActionArbiter,
    applier: ActionApplier,
    core_updater: CoreMemoryUpdater,
    mode: ReconcileMode,
    working_capacity: usize,
    working_context: usize,
}

impl Reconciler {
    pub fn new(
        judgment: Arc<JudgmentService>,
        embedder: Arc<BoxEmbedder>,
        store: Arc<MemoryStore>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            extractor: FactExtractor::new(judgment.clone()),
            retriever: SimilarityRetriever::new(embedder.clone(), store.clone())
                .with_top_k(settings.top_k)
                .with_threshold(settings.similarity_threshold),
            arbiter: ActionArbiter::new(judgment.clone()),
            applier: ActionApplier::new(embedder, store),
            core_updater: CoreMemoryUpdater::new(judgment)
                .with_max_chars(settings.core_memory_max_chars),
            mode: settings.mode,
            working_capacity: settings.working_memory_capacity,
            working_context: settings.working_memory_context,
        }
    }

    /// Run every chunk of `unit` through the pipeline.
    ///
    /// Never fails: stages that exhaust their budgets degrade and the unit
    /// still produces a result.
    #[tracing::instrument(
        name = "reconcile.unit",
        skip_all,
        fields(unit_id = %unit.unit_id, mode = %self.mode)
    )]
    pub async fn run_unit(&self, unit: &ReconciliationUnit) -> UnitResult {
        let mut state = UnitState::new(WorkingMemory::new(self.working_capacity));
        let user_id = unit.unit_id.as_str();

        for chunk in unit.chunks() {
            let text = chunk.render();
            self.process_chunk(user_id, &text, &mut state).await;
        }

        tracing::info!(
            turns = state.turns,
            counts = %state.counts,
            degraded = state.degraded,
            "unit reconciled"
        );

        UnitResult {
            unit_id: unit.unit_id.clone(),
            operation_counts: state.counts,
            core_memory: state.core.into_inner(),
            audit: state.audit,
            turns_processed: state.turns,
            degraded: state.degraded,
        }
    }

    async fn process_chunk(&self, user_id: &str, text: &str, state: &mut UnitState) {
        let batch_time = Utc::now();

        let recent = state.working.recent(self.working_context);
        let extraction = self.extractor.extract(text, &state.core, &recent).await;
        state.degraded |= extraction.degraded;

        state.working.maintain(text);
        for fact in &extraction.facts {
            state.working.maintain(format!("Extracted fact: {}", fact.text));
        }

        let facts = extraction.facts;
        if !facts.is_empty() {
            let batch = match self.mode {
                ReconcileMode::AppendOnly => {
                    self.applier
                        .append_all(user_id, &facts, &HashMap::new(), batch_time)
                        .await
                }
                ReconcileMode::Arbitrated => {
                    let retrieval = self.retriever.retrieve(user_id, &facts).await;
                    let arbitration = self
                        .arbiter
                        .arbitrate(&facts, &retrieval.candidates, &state.core)
                        .await;
                    state.degraded |= arbitration.degraded;
                    self.applier
                        .apply(
                            user_id,
                            &facts,
                            arbitration.decisions,
                            &arbitration.mapping,
                            &retrieval.embeddings,
                            batch_time,
                        )
                        .await
                }
            };
            state.absorb(batch);
        }

        match self.core_updater.update(text, &state.core).await {
            CoreMemoryUpdate::Updated(snapshot) => {
                let preview: String = snapshot.as_str().chars().take(100).collect();
                state.working.maintain(format!("Updated core memory: {preview}..."));
                state.core = snapshot;
            }
            CoreMemoryUpdate::Unchanged => {}
            CoreMemoryUpdate::Failed(_) => state.degraded = true,
        }

        state.turns += 1;
    }
}

struct UnitState {
    working: WorkingMemory,
    core: CoreMemorySnapshot,
    counts: OperationCounts,
    audit: Vec<DecisionAudit>,
    turns: usize,
    degraded: bool,
}

impl UnitState {
    fn new(working: WorkingMemory) -> Self {
        Self {
            working,
            core: CoreMemorySnapshot::default(),
            counts: OperationCounts::default(),
            audit: Vec::new(),
            turns: 0,
            degraded: false,
        }
    }

    /// Merge a batch, renumbering its fact indexes to be unique in the unit.
    fn absorb(&mut self, batch: AppliedBatch) {
        let offset = self.audit.len();
        self.counts += batch.counts;
        self.audit.extend(batch.audit.into_iter().map(|mut entry| {
            entry.fact_index += offset;
            entry
        }));
    }
}
