//! LRU Module
//!
//! Recency-ordered entry list backing the cache store.

use std::collections::VecDeque;

use crate::cache::{Entry, EntryId};
use crate::key::{Key, KeyMatcher};

// == Recency List ==
/// Holds entries in access order.
///
/// Entries are stored in a VecDeque where:
/// - Front = Most recently used
/// - Back = Least recently used
///
/// Keys are compared with a pluggable matcher rather than hashed, so lookup
/// is a linear scan from the most recent entry.
#[derive(Debug)]
pub struct RecencyList<V> {
    /// Entries by access time
    order: VecDeque<Entry<V>>,
}

impl<V> Default for RecencyList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RecencyList<V> {
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Position ==
    /// Returns the index of the entry whose key matches `key`.
    pub fn position(&self, key: &Key, matcher: &KeyMatcher) -> Option<usize> {
        self.order
            .iter()
            .position(|entry| matcher.matches(&entry.key, key))
    }

    /// Returns the index of the entry with insertion id `id`.
    pub fn index_of(&self, id: EntryId) -> Option<usize> {
        self.order.iter().position(|entry| entry.id == id)
    }

    // == Touch ==
    /// Moves the entry at `index` to the front (most recent) and returns it.
    pub fn touch(&mut self, index: usize) -> Option<&mut Entry<V>> {
        if index != 0 {
            let entry = self.order.remove(index)?;
            self.order.push_front(entry);
        }
        self.order.front_mut()
    }

    // == Push ==
    /// Adds a new entry as the most recent one.
    pub fn push_front(&mut self, entry: Entry<V>) {
        self.order.push_front(entry);
    }

    // == Remove ==
    /// Removes the entry at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Entry<V>> {
        self.order.remove(index)
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used entry.
    ///
    /// Returns None if the list is empty.
    pub fn evict_oldest(&mut self) -> Option<Entry<V>> {
        self.order.pop_back()
    }

    pub fn get(&self, index: usize) -> Option<&Entry<V>> {
        self.order.get(index)
    }

    // == Drain ==
    /// Removes every entry, most recent first.
    pub fn drain(&mut self) -> Vec<Entry<V>> {
        self.order.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry<V>> {
        self.order.iter()
    }

    // == Length ==
    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
