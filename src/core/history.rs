// src/core/history.rs

use crate::models::HistoryEntry;
use std::collections::VecDeque;

/// A capped, FIFO-evicting record of past executions.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    enabled: bool,
}

impl HistoryStore {
    /// Creates an enabled store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            enabled: true,
        }
    }

    /// Appends `entry`, evicting the oldest one if the store is full.
    /// Does nothing while recording is disabled.
    pub fn record(&mut self, entry: HistoryEntry) {
        if !self.enabled {
            log::trace!("History disabled; dropping entry for '{}'", entry.command);
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries whose command contains `query` (case-insensitive), newest first.
    pub fn search(&self, query: &str) -> Vec<HistoryEntry> {
        let needle = query.to_lowercase();
        self.entries
            .iter()
            .rev()
            .filter(|entry| entry.command.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// A snapshot of every entry, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries whose timestamp falls in `[start, end]`, oldest first. Open bounds are unbounded.
    pub fn in_window(&self, start_ms: Option<u64>, end_ms: Option<u64>) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| start_ms.is_none_or(|start| entry.timestamp_ms >= start))
            .filter(|entry| end_ms.is_none_or(|end| entry.timestamp_ms <= end))
            .cloned()
            .collect()
    }

    /// Empties the store and returns how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, evicting the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Turns recording on or off. Existing entries are kept.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShellType;

    fn entry(command: &str, timestamp_ms: u64) -> HistoryEntry {
        HistoryEntry {
            command: command.to_string(),
            shell: ShellType::Bash,
            timestamp_ms,
            exit_code: Some(0),
            duration_ms: Some(1),
            timed_out: false,
        }
    }

    #[test]
    fn test_overflow_evicts_oldest_in_fifo_order() {
        let cap = 5;
        let extra = 3;
        let mut store = HistoryStore::new(cap);
        for i in 0..(cap + extra) {
            store.record(entry(&format!("cmd-{i}"), i as u64));
        }
        assert_eq!(store.len(), cap);
        let commands: Vec<String> = store.entries().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["cmd-3", "cmd-4", "cmd-5", "cmd-6", "cmd-7"]);
    }

    #[test]
    fn test_search_is_case_insensitive_and_newest_first() {
        let mut store = HistoryStore::new(10);
        store.record(entry("cargo build", 1));
        store.record(entry("ls -la", 2));
        store.record(entry("CARGO test", 3));
        let found: Vec<String> = store.search("Cargo").into_iter().map(|e| e.command).collect();
        assert_eq!(found, vec!["CARGO test", "cargo build"]);
        assert!(store.search("nothing").is_empty());
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let mut store = HistoryStore::new(10);
        for i in 0..4 {
            store.record(entry(&format!("cmd-{i}"), i));
        }
        let recent: Vec<String> = store.recent(2).into_iter().map(|e| e.command).collect();
        assert_eq!(recent, vec!["cmd-3", "cmd-2"]);
        assert_eq!(store.recent(100).len(), 4);
    }

    #[test]
    fn test_clear_returns_removed_count() {
        let mut store = HistoryStore::new(10);
        store.record(entry("a", 1));
        store.record(entry("b", 2));
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.clear(), 0);
    }

    #[test]
    fn test_shrinking_capacity_keeps_newest() {
        let mut store = HistoryStore::new(10);
        for i in 0..6 {
            store.record(entry(&format!("cmd-{i}"), i));
        }
        store.set_capacity(2);
        let kept: Vec<String> = store.entries().into_iter().map(|e| e.command).collect();
        assert_eq!(kept, vec!["cmd-4", "cmd-5"]);
    }

    #[test]
    fn test_disabled_store_ignores_records() {
        let mut store = HistoryStore::new(10);
        store.set_enabled(false);
        store.record(entry("ignored", 1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_window_filter_is_inclusive() {
        let mut store = HistoryStore::new(10);
        for ts in [10, 20, 30, 40] {
            store.record(entry(&format!("at-{ts}"), ts));
        }
        let window: Vec<u64> = store
            .in_window(Some(20), Some(30))
            .into_iter()
            .map(|e| e.timestamp_ms)
            .collect();
        assert_eq!(window, vec![20, 30]);
        assert_eq!(store.in_window(None, Some(15)).len(), 1);
    }
}
