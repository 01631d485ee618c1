//! Cache Event Module
//!
//! Notification records emitted by the store and the listener table that
//! delivers them.

use std::fmt;
use std::sync::Arc;

use crate::cache::EntryId;
use crate::error::Result;
use crate::key::Key;

// == Event Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Hit,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Add,
        EventKind::Update,
        EventKind::Hit,
        EventKind::Delete,
    ];

    fn slot(self) -> usize {
        match self {
            EventKind::Add => 0,
            EventKind::Update => 1,
            EventKind::Hit => 2,
            EventKind::Delete => 3,
        }
    }
}

// == Reason ==
/// Why an entry was updated or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Caller asked for it (`set` on an existing key, `delete`)
    Explicit,
    /// Least recently used entry dropped to respect capacity
    Evicted,
    /// Expiration timer removed the entry
    Expired,
    /// Removed by `clear`
    Cleared,
    /// Recomputed because the force-update predicate matched
    Forced,
    /// Expiration fired but the entry was kept and re-armed
    ExpirationReset,
    /// Pending async value completed successfully
    Resolved,
    /// Pending async value failed and was rolled back
    Rejected,
    /// Freshly stored value removed because a listener refused it
    RolledBack,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Reason::Explicit => "explicit",
            Reason::Evicted => "evicted",
            Reason::Expired => "expired",
            Reason::Cleared => "cleared",
            Reason::Forced => "forced",
            Reason::ExpirationReset => "expiration reset",
            Reason::Resolved => "resolved",
            Reason::Rejected => "rejected",
            Reason::RolledBack => "rolled back",
        };
        f.write_str(text)
    }
}

// == Cache Event ==
/// Immutable notification delivered to listeners after a store operation.
///
/// `add` and `hit` carry no reason.
#[derive(Debug, Clone)]
pub struct CacheEvent<V> {
    pub kind: EventKind,
    pub key: Key,
    pub value: V,
    pub reason: Option<Reason>,
    pub entry_id: EntryId,
    pub revision: u64,
}

// == Listeners ==
/// Event handler. Errors are collected and returned from the store
/// operation that emitted the event.
pub type Listener<V> = Arc<dyn Fn(&CacheEvent<V>) -> Result<()> + Send + Sync>;

/// Handle returned by `on`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-kind listener lists, in subscription order.
pub(crate) struct Listeners<V> {
    slots: [Vec<(ListenerId, Listener<V>)>; 4],
    next_id: u64,
}

impl<V> Default for Listeners<V> {
    fn default() -> Self {
        Self {
            slots: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            next_id: 0,
        }
    }
}

impl<V> Listeners<V> {
    pub(crate) fn add(&mut self, kind: EventKind, listener: Listener<V>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.slots[kind.slot()].push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let slot = &mut self.slots[kind.slot()];
        let before = slot.len();
        slot.retain(|(existing, _)| *existing != id);
        slot.len() != before
    }

    /// Copies the listeners for `kind` so they can run without the table
    /// locked.
    pub(crate) fn for_kind(&self, kind: EventKind) -> Vec<Listener<V>> {
        self.slots[kind.slot()]
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.slots[kind.slot()].len()
    }
}
