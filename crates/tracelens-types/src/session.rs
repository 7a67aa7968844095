use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, TokenUsage};

/// Reply-threading structure reconstructed from `id -> parent_id` links.
///
/// Entries whose parent never appears in the session are roots; early log
/// rotation and truncated history make that a normal shape, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadIndex {
    /// Entry ids with no resolvable parent, in session order
    pub roots: Vec<String>,
    /// Parent id -> child ids, in session order
    pub children: BTreeMap<String, Vec<String>>,
}

impl ThreadIndex {
    /// Build the thread index from entries already in session order.
    pub fn from_entries(entries: &[Entry]) -> ThreadIndex {
        let ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();

        let mut index = ThreadIndex::default();
        for entry in entries {
            match entry.parent_id.as_deref() {
                Some(parent) if parent != entry.id && ids.contains(parent) => {
                    index
                        .children
                        .entry(parent.to_string())
                        .or_default()
                        .push(entry.id.clone());
                }
                _ => index.roots.push(entry.id.clone()),
            }
        }
        index
    }

    /// Child ids of an entry, in session order
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether an entry is a thread root
    pub fn is_root(&self, id: &str) -> bool {
        self.roots.iter().any(|r| r == id)
    }
}

/// Derived per-session aggregates for listing and rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Number of entries in the session
    pub message_count: usize,
    /// Summed token usage across all entries
    pub usage: TokenUsage,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Working directory reported by the earliest entry that carries one
    pub cwd: Option<String>,
    /// Display title: explicit summary record, else first real user message
    pub title: Option<String>,
}

/// An assembled conversation session. Immutable once built; construction is
/// owned by the assembler, which guarantees at least one entry, unique ids,
/// and `(timestamp, id)` ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub entries: Vec<Entry>,
    pub thread: ThreadIndex,
    pub summary: SessionSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Role;

    fn entry(id: &str, parent: Option<&str>) -> Entry {
        Entry {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            role: Role::User,
            timestamp: None,
            session_id: "s1".to_string(),
            cwd: None,
            usage: None,
            is_sidechain: false,
            is_meta: false,
            tool_use_result: None,
            content: Vec::new(),
        }
    }

    #[test]
    fn test_orphaned_parent_becomes_root() {
        let entries = vec![
            entry("1", None),
            entry("2", Some("1")),
            entry("3", Some("99")),
        ];
        let index = ThreadIndex::from_entries(&entries);

        assert_eq!(index.roots, vec!["1", "3"]);
        assert_eq!(index.children_of("1"), ["2"]);
        assert!(index.is_root("3"));
        assert!(!index.is_root("2"));
    }

    #[test]
    fn test_self_reference_is_root() {
        let entries = vec![entry("1", Some("1"))];
        let index = ThreadIndex::from_entries(&entries);
        assert_eq!(index.roots, vec!["1"]);
        assert!(index.children.is_empty());
    }
}
