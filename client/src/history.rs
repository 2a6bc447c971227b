use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One past search the user can revisit; `id` replays the stored result
/// via the query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub query: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(id: Uuid, query: impl Into<String>) -> Self {
        Self {
            id,
            query: query.into(),
            created_at: Utc::now(),
        }
    }
}

/// Search history as an injected dependency rather than a global mutable
/// list: read the log, append to it, nothing else.
pub trait HistoryRepository: Send + Sync {
    /// Entries in reverse chronological order (newest first).
    fn list(&self) -> Vec<HistoryEntry>;
    fn append(&self, entry: HistoryEntry);
}

#[derive(Default)]
pub struct MemoryHistory {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryRepository for MemoryHistory {
    fn list(&self) -> Vec<HistoryEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().cloned().collect()
    }

    fn append(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_returns_newest_first() {
        let history = MemoryHistory::new();
        history.append(HistoryEntry::new(Uuid::new_v4(), "first"));
        history.append(HistoryEntry::new(Uuid::new_v4(), "second"));

        let entries = history.list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "second");
        assert_eq!(entries[1].query, "first");
    }

    #[test]
    fn test_empty_history() {
        assert!(MemoryHistory::new().list().is_empty());
    }
}
