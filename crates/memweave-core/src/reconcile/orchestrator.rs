//! Bounded-concurrency fan-out of reconciliation units.
//!
//! Units run as tokio tasks in a `JoinSet`, at most `workers` at a time
//! (gated by a `Semaphore`). Only the collecting loop touches the progress
//! store and the result sink, so neither needs a lock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use memweave_types::config::MAX_WORKERS;
use memweave_types::decision::OperationCounts;
use memweave_types::dialogue::ReconciliationUnit;
use memweave_types::error::PersistError;
use memweave_types::run::{RunSummary, UnitResult};

use super::persist::{ProgressStore, ResultSink};
use super::session::Reconciler;

pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to read progress: {0}")]
    ProgressLoad(#[source] PersistError),

    #[error("failed to persist progress for unit '{unit_id}': {source}")]
    ProgressSave {
        unit_id: String,
        #[source]
        source: PersistError,
    },

    #[error("failed to write result for unit '{unit_id}': {source}")]
    ResultWrite {
        unit_id: String,
        #[source]
        source: PersistError,
    },
}

/// Callback fired in the collecting loop after each unit is persisted.
pub type UnitObserver = Arc<dyn Fn(&UnitResult) + Send + Sync>;

pub struct Orchestrator {
    reconciler: Arc<Reconciler>,
    workers: usize,
    observer: Option<UnitObserver>,
}

impl Orchestrator {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            workers: DEFAULT_WORKERS,
            observer: None,
        }
    }

    /// Pool width, clamped to `1..=MAX_WORKERS`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_observer(mut self, observer: UnitObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Reconcile every unit not already recorded in `progress`.
    ///
    /// Each completed unit is written to `sink` and then marked in
    /// `progress` before the next result is collected. A unit whose task
    /// panicked is reported in the summary but neither written nor marked,
    /// so the next run reconciles it and writes its only record. Totals are
    /// the pointwise sum of per-unit counts, independent of completion order.
    #[tracing::instrument(
        name = "orchestrator.run",
        skip_all,
        fields(units = units.len(), workers = self.workers)
    )]
    pub async fn run<P, S>(
        &self,
        units: Vec<ReconciliationUnit>,
        progress: &P,
        sink: &mut S,
    ) -> Result<RunSummary, OrchestratorError>
    where
        P: ProgressStore,
        S: ResultSink,
    {
        let mut snapshot = progress
            .load()
            .await
            .map_err(OrchestratorError::ProgressLoad)?;

        let (pending, done): (Vec<_>, Vec<_>) = units
            .into_iter()
            .partition(|unit| !snapshot.contains(&unit.unit_id));
        let skipped_units: Vec<String> = done.into_iter().map(|u| u.unit_id).collect();
        if !skipped_units.is_empty() {
            tracing::info!(
                skipped = skipped_units.len(),
                "skipping units completed in a previous run"
            );
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for unit in pending {
            let reconciler = Arc::clone(&self.reconciler);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (UnitResult::failed(unit.unit_id.clone(), None), false);
                };
                match AssertUnwindSafe(reconciler.run_unit(&unit)).catch_unwind().await {
                    Ok(result) => (result, true),
                    Err(_) => {
                        tracing::error!(
                            unit_id = %unit.unit_id,
                            "unit panicked; leaving it pending for the next run"
                        );
                        (UnitResult::failed(unit.unit_id.clone(), None), false)
                    }
                }
            });
        }

        let mut results = Vec::new();
        let mut totals = OperationCounts::default();
        while let Some(joined) = tasks.join_next().await {
            let (result, completed) = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(error = %err, "unit task did not finish");
                    continue;
                }
            };

            if completed {
                sink.write(&result)
                    .await
                    .map_err(|source| OrchestratorError::ResultWrite {
                        unit_id: result.unit_id.clone(),
                        source,
                    })?;
                snapshot.mark_processed(&result.unit_id);
                progress
                    .save(&snapshot)
                    .await
                    .map_err(|source| OrchestratorError::ProgressSave {
                        unit_id: result.unit_id.clone(),
                        source,
                    })?;
            }

            totals += result.operation_counts;
            if let Some(observer) = &self.observer {
                observer(&result);
            }
            results.push(result);
        }

        tracing::info!(units = results.len(), %totals, "run finished");
        Ok(RunSummary {
            results,
            totals,
            skipped_units,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::llm::judgment::JudgmentService;
    use crate::memory::box_embedder::BoxEmbedder;
    use crate::memory::store::MemoryStore;
    use crate::reconcile::persist::MemoryProgress;
    use crate::retry::RetryPolicy;
    use crate::testing::{HashEmbedder, ScriptedProvider};
    use crate::vector::box_store::BoxVectorStore;
    use crate::vector::in_memory::InMemoryVectorStore;
    use memweave_types::config::PipelineSettings;
    use memweave_types::dialogue::{DialogueTurn, Speaker};
    use memweave_types::llm::{CompletionRequest, LlmError};
    use memweave_types::run::ProgressSnapshot;

    fn unit(id: &str, text: &str) -> ReconciliationUnit {
        ReconciliationUnit {
            unit_id: id.into(),
            sessions: vec![vec![DialogueTurn {
                role: Speaker::User,
                content: text.into(),
            }]],
            session_dates: vec!["2024/01/02".into()],
        }
    }

    /// One unit with a single session of user-only turns.
    fn unit_of_turns(id: &str, turns: &[&str]) -> ReconciliationUnit {
        ReconciliationUnit {
            unit_id: id.into(),
            sessions: vec![
                turns
                    .iter()
                    .map(|text| DialogueTurn {
                        role: Speaker::User,
                        content: text.to_string(),
                    })
                    .collect(),
            ],
            session_dates: vec!["2024/01/02".into()],
        }
    }

    /// Each user turn names the fact it should yield; facts mentioning
    /// "skip" are judged NONE, everything else ADD.
    fn responder(request: &CompletionRequest) -> Result<String, LlmError> {
        let system = request.system.as_deref().unwrap_or_default();
        let user = request.user_text();
        if system.contains("Personal Information Organizer") {
            let fact = user
                .lines()
                .last()
                .unwrap_or_default()
                .trim_start_matches("user: ");
            return Ok(serde_json::json!({"facts": [{"fact": fact, "details": []}]}).to_string());
        }
        if system.contains("memory manager") {
            let new_facts = user.split("New facts:").last().unwrap_or_default();
            let event = if new_facts.contains("skip") { "NONE" } else { "ADD" };
            return Ok(serde_json::json!({
                "memory": [{"fact_id": 0, "id": null, "text": "x", "event": event}]
            })
            .to_string());
        }
        Ok("Profile.".into())
    }

    async fn orchestrator(workers: usize) -> Orchestrator {
        orchestrator_with(ScriptedProvider::with_responder(responder), workers).await
    }

    async fn orchestrator_with(provider: ScriptedProvider, workers: usize) -> Orchestrator {
        let judgment = Arc::new(JudgmentService::new(
            Arc::new(BoxLlmProvider::new(provider)),
            RetryPolicy::immediate(1),
        ));
        let backend = Arc::new(BoxVectorStore::new(InMemoryVectorStore::new()));
        let store = Arc::new(MemoryStore::new(backend, "memories", 16));
        store.ensure_collection().await.unwrap();
        let embedder = Arc::new(BoxEmbedder::new(HashEmbedder::new(16)));
        let reconciler = Reconciler::new(judgment, embedder, store, &PipelineSettings::default());
        Orchestrator::new(Arc::new(reconciler)).with_workers(workers)
    }

    #[tokio::test]
    async fn processes_pending_units_and_skips_completed_ones() {
        let orchestrator = orchestrator(4).await;
        let progress = MemoryProgress::new(ProgressSnapshot {
            processed_unit_ids: vec!["done".into()],
            timestamp: String::new(),
        });
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let orchestrator = orchestrator.with_observer(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let units = vec![
            unit("a", "Has a cat"),
            unit("b", "Likes jazz"),
            unit("done", "Old news"),
            unit("c", "Plays chess"),
        ];
        let mut sink: Vec<UnitResult> = Vec::new();
        let summary = orchestrator.run(units, &progress, &mut sink).await.unwrap();

        assert_eq!(summary.skipped_units, vec!["done"]);
        assert_eq!(summary.results.len(), 3);
        assert_eq!(sink.len(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        let expected: OperationCounts =
            summary.results.iter().map(|r| r.operation_counts).sum();
        assert_eq!(summary.totals, expected);
        assert_eq!(summary.totals, OperationCounts::new(3, 0, 0, 0));

        let snapshot = progress.snapshot();
        for id in ["a", "b", "c", "done"] {
            assert!(snapshot.contains(id), "missing {id}");
        }
    }

    #[tokio::test]
    async fn rerun_with_full_progress_does_nothing() {
        let orchestrator = orchestrator(2).await;
        let progress = MemoryProgress::new(ProgressSnapshot {
            processed_unit_ids: vec!["a".into()],
            timestamp: String::new(),
        });
        let mut sink: Vec<UnitResult> = Vec::new();
        let summary = orchestrator
            .run(vec![unit("a", "Has a cat")], &progress, &mut sink)
            .await
            .unwrap();
        assert!(summary.results.is_empty());
        assert!(sink.is_empty());
        assert_eq!(summary.totals, OperationCounts::default());
    }

    #[tokio::test]
    async fn workers_are_clamped() {
        assert_eq!(orchestrator(0).await.workers(), 1);
        assert_eq!(orchestrator(1000).await.workers(), MAX_WORKERS);
    }

    fn mixed_units() -> Vec<ReconciliationUnit> {
        vec![
            unit_of_turns("u1", &["Has a cat"]),
            unit_of_turns("u2", &["Likes jazz", "skip this one"]),
            unit_of_turns("u3", &["Plays chess", "Runs daily", "skip again"]),
            unit_of_turns("u4", &["skip", "skip", "Owns a bike", "Speaks Dutch"]),
            unit_of_turns("u5", &["Bakes bread"]),
        ]
    }

    async fn per_unit_counts(
        workers: usize,
    ) -> (OperationCounts, BTreeMap<String, OperationCounts>) {
        let orchestrator = orchestrator(workers).await;
        let progress = MemoryProgress::default();
        let mut sink: Vec<UnitResult> = Vec::new();
        let summary = orchestrator
            .run(mixed_units(), &progress, &mut sink)
            .await
            .unwrap();
        let by_unit = summary
            .results
            .iter()
            .map(|r| (r.unit_id.clone(), r.operation_counts))
            .collect();
        (summary.totals, by_unit)
    }

    #[tokio::test]
    async fn totals_do_not_depend_on_worker_count() {
        let (serial_totals, serial_units) = per_unit_counts(1).await;
        let (parallel_totals, parallel_units) = per_unit_counts(8).await;

        assert_eq!(serial_totals, OperationCounts::new(7, 0, 0, 4));
        assert_eq!(parallel_totals, serial_totals);
        assert_eq!(parallel_units, serial_units);
        assert_eq!(serial_units.len(), 5);
        assert_eq!(serial_units["u4"], OperationCounts::new(2, 0, 0, 2));
    }

    #[tokio::test]
    async fn panicked_unit_is_written_once_after_rerun() {
        let crashed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&crashed);
        let provider = ScriptedProvider::with_responder(move |request| {
            if request.user_text().contains("explode") && !flag.swap(true, Ordering::SeqCst) {
                panic!("judgment backend crashed");
            }
            responder(request)
        });
        let orchestrator = orchestrator_with(provider, 1).await;
        let progress = MemoryProgress::default();
        let mut sink: Vec<UnitResult> = Vec::new();
        let units = || vec![unit("a", "Has a cat"), unit("b", "Will explode")];

        let first = orchestrator.run(units(), &progress, &mut sink).await.unwrap();
        assert!(crashed.load(Ordering::SeqCst));
        assert_eq!(first.results.len(), 2);
        assert!(first.results.iter().any(|r| r.unit_id == "b" && r.degraded));
        let written: Vec<_> = sink.iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(written, vec!["a"]);
        assert!(!progress.snapshot().contains("b"));

        let second = orchestrator.run(units(), &progress, &mut sink).await.unwrap();
        assert_eq!(second.skipped_units, vec!["a"]);
        let written: Vec<_> = sink.iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(written, vec!["a", "b"]);
        assert!(progress.snapshot().contains("b"));
    }
}
