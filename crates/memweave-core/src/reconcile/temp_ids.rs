//! Batch-local relabeling of store ids.
//!
//! The judgment service only ever sees `"0"`, `"1"`, ... in place of real
//! record ids. A mapping lives for exactly one arbiter/applier pass.

use std::collections::HashMap;

use memweave_types::memory::{MemoryRecord, ScoredRecord};

#[derive(Debug, Default)]
pub struct TempIdMapping {
    to_real: Vec<String>,
    to_temp: HashMap<String, usize>,
}

impl TempIdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign labels to candidates in order, skipping repeated real ids.
    pub fn from_candidates(candidates: &[ScoredRecord]) -> Self {
        let mut mapping = Self::new();
        for candidate in candidates {
            mapping.assign(&candidate.record);
        }
        mapping
    }

    /// Label for `record`, allocating the next integer when it is new.
    pub fn assign(&mut self, record: &MemoryRecord) -> String {
        if let Some(idx) = self.to_temp.get(&record.id) {
            return idx.to_string();
        }
        let idx = self.to_real.len();
        self.to_real.push(record.id.clone());
        self.to_temp.insert(record.id.clone(), idx);
        idx.to_string()
    }

    /// Real id behind a temp label.
    ///
    /// Only the exact labels this mapping issued resolve: `"00"`, `"+0"` or
    /// `" 0"` do not. Nothing is ever guessed.
    pub fn resolve(&self, temp_id: &str) -> Option<&str> {
        let idx = temp_id.parse::<usize>().ok()?;
        if idx.to_string() != temp_id {
            return None;
        }
        self.to_real.get(idx).map(String::as_str)
    }

    pub fn temp_id_of(&self, real_id: &str) -> Option<String> {
        self.to_temp.get(real_id).map(usize::to_string)
    }

    pub fn contains(&self, temp_id: &str) -> bool {
        self.resolve(temp_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use chrono::Utc;
    use memweave_types::memory::MemoryType;

    use super::*;

    fn scored(id: &str) -> ScoredRecord {
        let now = Utc::now();
        ScoredRecord {
            record: MemoryRecord {
                id: id.into(),
                user_id: "u1".into(),
                content: format!("content {id}"),
                embedding: Vec::new(),
                memory_type: MemoryType::Semantic,
                created_at: now,
                updated_at: now,
                details: BTreeMap::new(),
            },
            similarity: 0.5,
        }
    }

    #[test]
    fn labels_are_unique_and_bijective() {
        let candidates: Vec<_> = ["a1b2", "c3d4", "e5f6", "a1b2"]
            .iter()
            .map(|id| scored(id))
            .collect();
        let mapping = TempIdMapping::from_candidates(&candidates);

        let temps: HashSet<String> = ["a1b2", "c3d4", "e5f6"]
            .iter()
            .filter_map(|real| mapping.temp_id_of(real))
            .collect();
        assert_eq!(temps.len(), 3);
        for temp in &temps {
            let real = mapping.resolve(temp).unwrap();
            assert_eq!(mapping.temp_id_of(real).as_ref(), Some(temp));
        }
        assert!(!mapping.contains("3"));
    }

    #[test]
    fn unknown_labels_do_not_resolve() {
        let mapping = TempIdMapping::from_candidates(&[scored("x")]);
        assert_eq!(mapping.resolve("0"), Some("x"));
        assert_eq!(mapping.resolve("1"), None);
        assert_eq!(mapping.resolve("x"), None);
        assert_eq!(mapping.resolve("-1"), None);
    }

    #[test]
    fn only_issued_spellings_resolve() {
        let mapping = TempIdMapping::from_candidates(&[scored("x"), scored("y")]);
        for spelling in ["00", "+0", " 0", "0 ", "01", "+1"] {
            assert_eq!(mapping.resolve(spelling), None, "{spelling:?}");
        }
        assert_eq!(mapping.resolve("1"), Some("y"));
    }

    #[test]
    fn fresh_mapping_per_batch() {
        let first = TempIdMapping::from_candidates(&[scored("x"), scored("y")]);
        let second = TempIdMapping::from_candidates(&[scored("y")]);
        assert_eq!(first.resolve("1"), Some("y"));
        assert_eq!(second.resolve("0"), Some("y"));
        assert!(!second.contains("1"));
    }
}
