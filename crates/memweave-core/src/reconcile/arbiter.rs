//! Action arbitration: one judgment call decides ADD/UPDATE/DELETE/NONE for
//! every fact of a batch.
//!
//! Candidates are shown to the model under fresh temp ids. The reply is
//! validated into [`ActionDecision`]s here, at the boundary; anything that
//! does not validate becomes a skip with a [`SkipReason`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use memweave_types::decision::{ActionDecision, MemoryAction};
use memweave_types::error::SkipReason;
use memweave_types::memory::{CoreMemorySnapshot, Fact, ScoredRecord};

use super::temp_ids::TempIdMapping;
use crate::llm::judgment::JudgmentService;

pub const MEMORY_FIELD: &str = "memory";

const ARBITER_PROMPT: &str = r#"You are a memory manager. Compare each new fact with the user's existing memories and choose exactly one event per fact:

- ADD: the fact is new information with no significant overlap.
- UPDATE: the fact refines or extends an existing memory about the same subject. Give that memory's id and the merged text.
- DELETE: the fact contradicts an existing memory so that memory is no longer true. Give that memory's id.
- NONE: the fact is already fully represented.

Use only the ids listed under existing memories. Reply with JSON only:
{"memory": [{"fact_id": 0, "id": "0", "text": "...", "event": "UPDATE", "old_memory": "..."}]}
For ADD and NONE set "id" to null."#;

/// Decision for the fact at `fact_index` of the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FactDecision {
    pub fact_index: usize,
    pub decision: Result<ActionDecision, SkipReason>,
}

#[derive(Debug)]
pub struct Arbitration {
    /// One entry per fact, in fact order.
    pub decisions: Vec<FactDecision>,
    pub mapping: TempIdMapping,
    pub degraded: bool,
}

pub struct ActionArbiter {
    judgment: Arc<JudgmentService>,
}

impl ActionArbiter {
    pub fn new(judgment: Arc<JudgmentService>) -> Self {
        Self { judgment }
    }

    #[tracing::instrument(
        name = "arbiter.arbitrate",
        skip_all,
        fields(facts = facts.len(), candidates = candidates.len())
    )]
    pub async fn arbitrate(
        &self,
        facts: &[Fact],
        candidates: &[ScoredRecord],
        core: &CoreMemorySnapshot,
    ) -> Arbitration {
        let mapping = TempIdMapping::from_candidates(candidates);
        if facts.is_empty() {
            return Arbitration {
                decisions: Vec::new(),
                mapping,
                degraded: false,
            };
        }

        let user = render_prompt(facts, candidates, &mapping, core);
        match self
            .judgment
            .complete_json("arbitrate_actions", Some(ARBITER_PROMPT), &user, MEMORY_FIELD)
            .await
        {
            Ok(value) => Arbitration {
                decisions: validate_decisions(&value, facts, &mapping),
                mapping,
                degraded: false,
            },
            Err(err) => {
                tracing::warn!(error = %err, "arbitration failed; every fact becomes NONE");
                Arbitration {
                    decisions: all_none(facts),
                    mapping,
                    degraded: true,
                }
            }
        }
    }
}

/// Decisions for a batch that was never arbitrated: NONE for every fact.
pub fn all_none(facts: &[Fact]) -> Vec<FactDecision> {
    facts
        .iter()
        .enumerate()
        .map(|(fact_index, fact)| FactDecision {
            fact_index,
            decision: Ok(ActionDecision::None {
                text: fact.text.clone(),
            }),
        })
        .collect()
}

fn render_prompt(
    facts: &[Fact],
    candidates: &[ScoredRecord],
    mapping: &TempIdMapping,
    core: &CoreMemorySnapshot,
) -> String {
    let existing = if candidates.is_empty() {
        "There are no related memories yet; every informative fact is new.".to_string()
    } else {
        let rows: Vec<Value> = candidates
            .iter()
            .filter_map(|c| {
                mapping
                    .temp_id_of(&c.record.id)
                    .map(|id| json!({"id": id, "text": c.record.content}))
            })
            .collect();
        format!("{:#}", Value::Array(rows))
    };

    let new_facts: Vec<Value> = facts
        .iter()
        .enumerate()
        .map(|(idx, f)| {
            json!({
                "fact_id": idx,
                "text": f.text,
                "details": f.details,
                "timestamp": f.timestamp,
            })
        })
        .collect();

    format!(
        "Core memory:\n{core}\n\nExisting memories:\n{existing}\n\nNew facts:\n{:#}",
        Value::Array(new_facts)
    )
}

/// Turn the decoded `memory` array into exactly one decision per fact.
///
/// Entries are matched to facts by `fact_id`, then by identical text, then
/// by position. The first entry for a fact wins. Facts left without an
/// entry become NONE.
pub fn validate_decisions(
    value: &Value,
    facts: &[Fact],
    mapping: &TempIdMapping,
) -> Vec<FactDecision> {
    let mut slots: Vec<Option<Result<ActionDecision, SkipReason>>> = vec![None; facts.len()];
    let items = value
        .get(MEMORY_FIELD)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for (position, item) in items.iter().enumerate() {
        let Some(index) = match_fact(item, position, facts, &slots) else {
            tracing::warn!(entry = %item, "decision matches no undecided fact; dropped");
            continue;
        };
        let decision = parse_decision(item, mapping);
        if let Err(reason) = &decision {
            tracing::warn!(fact_index = index, ?reason, entry = %item, "decision rejected");
        }
        slots[index] = Some(decision);
    }

    slots
        .into_iter()
        .zip(facts)
        .enumerate()
        .map(|(fact_index, (slot, fact))| FactDecision {
            fact_index,
            decision: slot.unwrap_or_else(|| {
                Ok(ActionDecision::None {
                    text: fact.text.clone(),
                })
            }),
        })
        .collect()
}

fn match_fact(
    item: &Value,
    position: usize,
    facts: &[Fact],
    slots: &[Option<Result<ActionDecision, SkipReason>>],
) -> Option<usize> {
    let free = |idx: usize| idx < facts.len() && slots[idx].is_none();

    let by_id = item.get("fact_id").and_then(|v| match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    });
    if let Some(idx) = by_id {
        if free(idx) {
            return Some(idx);
        }
        if idx < facts.len() {
            tracing::warn!(fact_index = idx, "duplicate decision for fact; keeping the first");
            return None;
        }
    }

    if let Some(text) = item.get("text").and_then(Value::as_str) {
        let text = text.trim();
        let same_text = |i: usize| facts[i].text.trim().eq_ignore_ascii_case(text);
        if let Some(idx) = (0..facts.len()).find(|&i| free(i) && same_text(i)) {
            return Some(idx);
        }
    }

    if by_id.is_none() && free(position) {
        return Some(position);
    }
    None
}

fn parse_decision(item: &Value, mapping: &TempIdMapping) -> Result<ActionDecision, SkipReason> {
    let action = item
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| SkipReason::InvalidDecision("missing event".into()))?
        .parse::<MemoryAction>()
        .map_err(SkipReason::InvalidDecision)?;

    let text = item
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SkipReason::InvalidDecision("missing text".into()))?
        .to_string();

    let details = item.get("details").map(parse_details).unwrap_or_default();

    let temp_id = match item.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    match action {
        MemoryAction::Add => Ok(ActionDecision::Add { text, details }),
        MemoryAction::None => Ok(ActionDecision::None { text }),
        MemoryAction::Update | MemoryAction::Delete => {
            let temp_id = temp_id.ok_or_else(|| {
                SkipReason::InvalidDecision(format!("{action} without a memory id"))
            })?;
            if !mapping.contains(&temp_id) {
                return Err(SkipReason::UnknownReference(temp_id));
            }
            Ok(if action == MemoryAction::Update {
                ActionDecision::Update {
                    temp_id,
                    text,
                    details,
                }
            } else {
                ActionDecision::Delete { temp_id, text }
            })
        }
    }
}

fn parse_details(value: &Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    match value {
        Value::Object(obj) => {
            for (k, v) in obj {
                let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                map.insert(k.clone(), v);
            }
        }
        Value::Array(items) => {
            for entry in items.iter().filter_map(Value::as_str) {
                if let Some((k, v)) = entry.split_once(':') {
                    if !k.trim().is_empty() {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }
        _ => {}
    }
    map
}
