//! Bounded FIFO of recent raw context for one reconciliation unit.

use std::collections::VecDeque;

use chrono::Utc;

use memweave_types::memory::WorkingMemoryEntry;

pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Clone)]
pub struct WorkingMemory {
    capacity: usize,
    entries: VecDeque<WorkingMemoryEntry>,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Append `content` stamped with the current instant, evicting the
    /// oldest entry once the buffer exceeds capacity.
    pub fn maintain(&mut self, content: impl Into<String>) {
        self.entries.push_back(WorkingMemoryEntry {
            timestamp: Utc::now(),
            content: content.into(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&WorkingMemoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Render entries for a prompt, one per line with their timestamp.
pub fn render_entries(entries: &[&WorkingMemoryEntry]) -> String {
    if entries.is_empty() {
        return "(empty)".to_string();
    }
    entries
        .iter()
        .map(|e| format!("- [{}] {}", e.timestamp.format("%Y-%m-%d %H:%M:%S"), e.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut wm = WorkingMemory::default();
        for i in 0..7 {
            wm.maintain(format!("entry {i}"));
        }
        assert_eq!(wm.len(), 5);
        let all = wm.recent(10);
        assert_eq!(all.first().unwrap().content, "entry 2");
        assert_eq!(all.last().unwrap().content, "entry 6");
    }

    #[test]
    fn recent_returns_last_n_oldest_first() {
        let mut wm = WorkingMemory::new(5);
        for i in 0..4 {
            wm.maintain(format!("entry {i}"));
        }
        let recent: Vec<_> = wm.recent(3).iter().map(|e| e.content.clone()).collect();
        assert_eq!(recent, vec!["entry 1", "entry 2", "entry 3"]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut wm = WorkingMemory::new(0);
        wm.maintain("a");
        wm.maintain("b");
        assert_eq!(wm.capacity(), 1);
        assert_eq!(wm.recent(5)[0].content, "b");
    }

    #[test]
    fn render_empty_and_filled() {
        assert_eq!(render_entries(&[]), "(empty)");
        let mut wm = WorkingMemory::default();
        wm.maintain("user: hi");
        assert!(render_entries(&wm.recent(3)).contains("user: hi"));
    }
}
