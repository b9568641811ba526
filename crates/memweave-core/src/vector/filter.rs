//! Backend-neutral record filters.
//!
//! Backends translate a [`RecordFilter`] natively (SQL predicate, Qdrant
//! `must` conditions); [`RecordFilter::matches`] is the reference semantics
//! used by the in-process backend.

use serde_json::{Map, Value};

/// Field name that addresses the row id rather than a payload key.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    /// Every row.
    All,
    Eq { field: String, value: String },
    In { field: String, values: Vec<String> },
    And(Vec<RecordFilter>),
}

impl RecordFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        RecordFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::eq(ID_FIELD, value)
    }

    pub fn any_of(field: impl Into<String>, values: Vec<String>) -> Self {
        RecordFilter::In {
            field: field.into(),
            values,
        }
    }

    /// Conjunction, flattening nested `And`s and dropping `All`.
    pub fn and(self, other: RecordFilter) -> Self {
        let mut parts = Vec::new();
        for filter in [self, other] {
            match filter {
                RecordFilter::All => {}
                RecordFilter::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => RecordFilter::All,
            1 => parts.remove(0),
            _ => RecordFilter::And(parts),
        }
    }

    /// Evaluate against a row. Payload values compare by their string form.
    pub fn matches(&self, id: &str, payload: &Map<String, Value>) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Eq { field, value } => field_value(field, id, payload)
                .is_some_and(|v| v == *value),
            RecordFilter::In { field, values } => field_value(field, id, payload)
                .is_some_and(|v| values.iter().any(|candidate| *candidate == v)),
            RecordFilter::And(parts) => parts.iter().all(|f| f.matches(id, payload)),
        }
    }

    /// Every field this filter references.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            RecordFilter::All => Vec::new(),
            RecordFilter::Eq { field, .. } | RecordFilter::In { field, .. } => vec![field.as_str()],
            RecordFilter::And(parts) => parts.iter().flat_map(RecordFilter::fields).collect(),
        }
    }
}

fn field_value(field: &str, id: &str, payload: &Map<String, Value>) -> Option<String> {
    if field == ID_FIELD {
        return Some(id.to_string());
    }
    payload.get(field).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Map<String, Value> {
        json!({"user_id": "u1", "memory_type": "semantic", "rank": 3})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn eq_matches_payload_and_id() {
        assert!(RecordFilter::eq("user_id", "u1").matches("r1", &payload()));
        assert!(!RecordFilter::eq("user_id", "u2").matches("r1", &payload()));
        assert!(RecordFilter::id("r1").matches("r1", &payload()));
        assert!(RecordFilter::eq("rank", "3").matches("r1", &payload()));
        assert!(!RecordFilter::eq("missing", "x").matches("r1", &payload()));
    }

    #[test]
    fn and_flattens_and_drops_all() {
        let filter = RecordFilter::All
            .and(RecordFilter::eq("user_id", "u1"))
            .and(RecordFilter::id("r1"));
        assert_eq!(
            filter,
            RecordFilter::And(vec![RecordFilter::eq("user_id", "u1"), RecordFilter::id("r1")])
        );
        assert!(filter.matches("r1", &payload()));
        assert!(!filter.matches("r2", &payload()));
        assert_eq!(RecordFilter::All.and(RecordFilter::All), RecordFilter::All);
    }

    #[test]
    fn in_matches_any_value() {
        let filter = RecordFilter::any_of("memory_type", vec!["core".into(), "semantic".into()]);
        assert!(filter.matches("r1", &payload()));
        assert_eq!(filter.fields(), vec!["memory_type"]);
    }
}
