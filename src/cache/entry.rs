//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and snapshots of them.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::key::Key;

// == Entry Id ==
/// Identifies one insertion into a store.
///
/// Ids are never reused: deleting a key and storing it again yields a new
/// id, so a manager holding an id can tell a fresh entry from the one it
/// was tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    /// Insertion identity
    pub id: EntryId,
    /// Bumped every time the value is replaced in place
    pub revision: u64,
    /// The lookup key
    pub key: Key,
    /// The stored value
    pub value: V,
    /// When the key was first stored
    pub inserted_at: DateTime<Utc>,
    /// When the value was last replaced
    pub updated_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates a new entry at revision zero.
    pub fn new(id: EntryId, key: Key, value: V) -> Self {
        let now = Utc::now();
        Self {
            id,
            revision: 0,
            key,
            value,
            inserted_at: now,
            updated_at: now,
        }
    }

    // == Replace ==
    /// Replaces the value in place and bumps the revision.
    pub fn replace(&mut self, value: V) {
        self.value = value;
        self.revision += 1;
        self.updated_at = Utc::now();
    }
}

// == Snapshot ==
/// Defensive copy of a store's contents, most-recently-used first.
#[derive(Debug, Clone)]
pub struct CacheSnapshot<V> {
    pub entries: Vec<(Key, V)>,
}

impl<V: Clone> CacheSnapshot<V> {
    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Value;

    #[test]
    fn test_entry_creation() {
        let entry = Entry::new(EntryId(1), Key::new(vec![Value::Int(1)]), "v");

        assert_eq!(entry.revision, 0);
        assert_eq!(entry.value, "v");
        assert_eq!(entry.inserted_at, entry.updated_at);
    }

    #[test]
    fn test_entry_replace_bumps_revision() {
        let mut entry = Entry::new(EntryId(1), Key::default(), 1);
        entry.replace(2);
        entry.replace(3);

        assert_eq!(entry.value, 3);
        assert_eq!(entry.revision, 2);
        assert_eq!(entry.id, EntryId(1));
        assert!(entry.updated_at >= entry.inserted_at);
    }

    #[test]
    fn test_snapshot_accessors() {
        let snapshot = CacheSnapshot {
            entries: vec![
                (Key::new(vec![Value::Int(2)]), "b"),
                (Key::new(vec![Value::Int(1)]), "a"),
            ],
        };

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.values(), vec!["b", "a"]);
        assert_eq!(snapshot.keys()[1].to_string(), "[1]");
        assert_eq!(EntryId(7).to_string(), "#7");
    }
}
