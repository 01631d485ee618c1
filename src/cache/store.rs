//! Cache Store Module
//!
//! Main cache engine: recency-ordered entries, bounded-size eviction and
//! synchronous event notification.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::cache::{
    CacheEvent, CacheSnapshot, Entry, EntryId, EventKind, Listener, ListenerId, Listeners, Reason,
    RecencyList,
};
use crate::config::Capacity;
use crate::error::Result;
use crate::key::{Key, KeyMatcher};

// == Cache Store ==
/// Ordered key/value store with LRU eviction and event notification.
///
/// `CacheStore` is a cheap handle; clones share the same entries. Events
/// are collected while the entry lock is held and delivered after it is
/// released but before the operation returns, so listeners may call back
/// into the store. Per-arg and whole-key matchers run against a copy of the
/// stored keys with the lock released, so they may call back too.
pub struct CacheStore<V> {
    shared: Arc<Shared<V>>,
}

/// Non-owning handle used for back-references from managers and timers.
pub struct WeakCacheStore<V> {
    shared: Weak<Shared<V>>,
}

struct Shared<V> {
    /// Entries and id counter
    state: Mutex<State<V>>,
    /// Subscribers per event kind
    listeners: RwLock<Listeners<V>>,
    /// Maximum number of entries allowed
    capacity: Capacity,
    /// Key equality
    matcher: KeyMatcher,
}

struct State<V> {
    entries: RecencyList<V>,
    next_id: u64,
    /// Bumped whenever an entry is added or removed
    generation: u64,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> Clone for WeakCacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<V> WeakCacheStore<V> {
    pub fn upgrade(&self) -> Option<CacheStore<V>> {
        self.shared.upgrade().map(|shared| CacheStore { shared })
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.shared.state.lock().entries.len())
            .field("capacity", &self.shared.capacity)
            .field("matcher", &self.shared.matcher)
            .finish()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a new store with the given capacity and key equality.
    pub fn new(capacity: Capacity, matcher: KeyMatcher) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: RecencyList::new(),
                    next_id: 0,
                    generation: 0,
                }),
                listeners: RwLock::new(Listeners::default()),
                capacity,
                matcher,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakCacheStore<V> {
        WeakCacheStore {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    pub fn matcher(&self) -> &KeyMatcher {
        &self.shared.matcher
    }

    // == Get ==
    /// Read-through lookup.
    ///
    /// On a match the entry becomes most recently used and a `hit` event is
    /// emitted.
    pub fn get(&self, key: &Key) -> Result<Option<V>> {
        let event = self.with_position(key, |state, index| {
            let entry = state.entries.touch(index?)?;
            Some(event_for(EventKind::Hit, entry, None))
        });
        let Some(event) = event else {
            return Ok(None);
        };

        let value = event.value.clone();
        self.dispatch(vec![event])?;
        Ok(Some(value))
    }

    // == Peek ==
    /// Introspection lookup: no reordering, no events.
    pub fn peek(&self, key: &Key) -> Option<V> {
        self.peek_entry(key).map(|entry| entry.value)
    }

    /// Copy of the entry matching `key`, without side effects.
    pub fn peek_entry(&self, key: &Key) -> Option<Entry<V>> {
        self.with_position(key, |state, index| state.entries.get(index?).cloned())
    }

    // == Has ==
    pub fn has(&self, key: &Key) -> bool {
        self.with_position(key, |_, index| index.is_some())
    }

    // == Set ==
    /// Stores a key-value pair.
    ///
    /// If the key already exists, the value is replaced and an `update`
    /// event with reason `explicit` is emitted. Otherwise the entry is added
    /// and, if the store is then over capacity, the least recently used
    /// entry is evicted.
    pub fn set(&self, key: Key, value: V) -> Result<()> {
        self.set_with_reason(key, value, Reason::Explicit)
    }

    /// Like [`set`](Self::set), tagging a replacement with `reason`.
    pub fn set_with_reason(&self, key: Key, value: V, reason: Reason) -> Result<()> {
        let lookup = key.clone();
        let events = self.with_position(&lookup, |state, index| {
            if let Some(index) = index {
                return match state.entries.touch(index) {
                    Some(entry) => {
                        entry.replace(value);
                        vec![event_for(EventKind::Update, entry, Some(reason))]
                    }
                    None => Vec::new(),
                };
            }

            state.next_id += 1;
            state.generation += 1;
            let entry = Entry::new(EntryId(state.next_id), key, value);
            let mut events = vec![event_for(EventKind::Add, &entry, None)];
            state.entries.push_front(entry);

            if self.shared.capacity.is_exceeded_by(state.entries.len()) {
                if let Some(evicted) = state.entries.evict_oldest() {
                    debug!(key = %evicted.key, "evicted least recently used entry");
                    events.push(event_for(EventKind::Delete, &evicted, Some(Reason::Evicted)));
                }
            }
            events
        });

        self.dispatch(events)
    }

    // == Delete ==
    /// Removes an entry by key.
    ///
    /// Returns whether anything was removed.
    pub fn delete(&self, key: &Key) -> Result<bool> {
        let event = self.with_position(key, |state, index| {
            let entry = state.entries.remove(index?)?;
            state.generation += 1;
            Some(event_for(EventKind::Delete, &entry, Some(Reason::Explicit)))
        });
        let Some(event) = event else {
            return Ok(false);
        };

        self.dispatch(vec![event])?;
        Ok(true)
    }

    // == Clear ==
    /// Removes every entry, emitting one `delete` event per entry with
    /// reason `cleared`, most recently used first.
    pub fn clear(&self) -> Result<()> {
        let events: Vec<_> = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state
                .entries
                .drain()
                .iter()
                .map(|entry| event_for(EventKind::Delete, entry, Some(Reason::Cleared)))
                .collect()
        };

        self.dispatch(events)
    }

    // == Conditional Removal ==
    /// Removes the entry for `key` only if it is still insertion `id` (and,
    /// when given, still at `revision`).
    ///
    /// Managers use this so a stale timer or a late async failure never
    /// removes a newer entry stored under the same key.
    pub(crate) fn remove_if_current(
        &self,
        key: &Key,
        id: EntryId,
        revision: Option<u64>,
        reason: Reason,
    ) -> Result<bool> {
        let event = self.with_position(key, |state, index| {
            let index = index?;
            let entry = state.entries.get(index)?;
            if entry.id != id || revision.map_or(false, |r| entry.revision != r) {
                return None;
            }
            let entry = state.entries.remove(index)?;
            state.generation += 1;
            Some(event_for(EventKind::Delete, &entry, Some(reason)))
        });
        let Some(event) = event else {
            return Ok(false);
        };

        self.dispatch(vec![event])?;
        Ok(true)
    }

    /// Emits an `update` event for the current value of `key` without
    /// touching the value or its position.
    pub(crate) fn notify_update(
        &self,
        key: &Key,
        id: EntryId,
        revision: Option<u64>,
        reason: Reason,
    ) -> Result<bool> {
        let event = self.with_position(key, |state, index| {
            state
                .entries
                .get(index?)
                .filter(|entry| entry.id == id && revision.map_or(true, |r| entry.revision == r))
                .map(|entry| event_for(EventKind::Update, entry, Some(reason)))
        });
        let Some(event) = event else {
            return Ok(false);
        };

        self.dispatch(vec![event])?;
        Ok(true)
    }

    // == Length ==
    /// Returns the current number of entries in the store.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    // == Snapshot ==
    /// Copies keys and values, most recently used first.
    pub fn snapshot(&self) -> CacheSnapshot<V> {
        let state = self.shared.state.lock();
        CacheSnapshot {
            entries: state
                .entries
                .iter()
                .map(|entry| (entry.key.clone(), entry.value.clone()))
                .collect(),
        }
    }

    // == Subscription ==
    /// Subscribes `listener` to events of `kind`.
    ///
    /// Listeners run synchronously, in subscription order, before the
    /// operation that emitted the event returns.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent<V>) -> Result<()> + Send + Sync + 'static,
    {
        let listener: Listener<V> = Arc::new(listener);
        self.shared.listeners.write().add(kind, listener)
    }

    /// Unsubscribes a listener; returns whether it was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.shared.listeners.write().remove(kind, id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.listeners.read().count(kind)
    }

    // == Lookup ==
    /// Runs `op` with the state locked and the index of the entry matching
    /// `key`, if any.
    ///
    /// Built-in matchers compare under the lock. User matchers compare
    /// against a copy of the stored keys with the lock released; if an entry
    /// was added or removed meanwhile, the comparison is redone.
    fn with_position<R>(&self, key: &Key, op: impl FnOnce(&mut State<V>, Option<usize>) -> R) -> R {
        let matcher = &self.shared.matcher;
        if !matcher.is_user_defined() {
            let mut state = self.shared.state.lock();
            let index = state.entries.position(key, matcher);
            return op(&mut *state, index);
        }

        loop {
            let (generation, candidates) = {
                let state = self.shared.state.lock();
                let candidates: Vec<(EntryId, Key)> = state
                    .entries
                    .iter()
                    .map(|entry| (entry.id, entry.key.clone()))
                    .collect();
                (state.generation, candidates)
            };

            let matched = candidates
                .iter()
                .find(|(_, stored)| matcher.matches(stored, key))
                .map(|(id, _)| *id);

            let mut state = self.shared.state.lock();
            if state.generation != generation {
                continue;
            }
            let index = matched.and_then(|id| state.entries.index_of(id));
            return op(&mut *state, index);
        }
    }

    /// Delivers events in order; every listener runs even if an earlier
    /// one failed, and the first error is returned.
    fn dispatch(&self, events: Vec<CacheEvent<V>>) -> Result<()> {
        let mut first_error = None;

        for event in &events {
            let listeners = self.shared.listeners.read().for_kind(event.kind);
            for listener in listeners {
                if let Err(err) = listener(event) {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn event_for<V: Clone>(kind: EventKind, entry: &Entry<V>, reason: Option<Reason>) -> CacheEvent<V> {
    CacheEvent {
        kind,
        key: entry.key.clone(),
        value: entry.value.clone(),
        reason,
        entry_id: entry.id,
        revision: entry.revision,
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::key::Value;

    fn key(s: &str) -> Key {
        Key::new(vec![Value::str(s)])
    }

    fn store(max_entries: usize) -> CacheStore<String> {
        CacheStore::new(Capacity::bounded(max_entries).unwrap(), KeyMatcher::Identity)
    }

    /// Records `(kind, key, reason)` for every event.
    fn record(store: &CacheStore<String>) -> Arc<Mutex<Vec<(EventKind, String, Option<Reason>)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let log = Arc::clone(&log);
            store.on(kind, move |event| {
                log.lock().push((event.kind, event.key.to_string(), event.reason));
                Ok(())
            });
        }
        log
    }

    #[test]
    fn test_store_new() {
        let store = store(100);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_set_and_get() {
        let store = store(100);

        store.set(key("key1"), "value1".to_string()).unwrap();
        let value = store.get(&key("key1")).unwrap();

        assert_eq!(value, Some("value1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let store = store(100);
        assert_eq!(store.get(&key("nonexistent")).unwrap(), None);
    }

    #[test]
    fn test_store_delete() {
        let store = store(100);

        store.set(key("key1"), "value1".to_string()).unwrap();
        assert!(store.delete(&key("key1")).unwrap());

        assert!(store.is_empty());
        assert!(!store.has(&key("key1")));
        assert!(!store.delete(&key("key1")).unwrap());
    }

    #[test]
    fn test_store_overwrite() {
        let store = store(100);

        store.set(key("key1"), "value1".to_string()).unwrap();
        store.set(key("key1"), "value2".to_string()).unwrap();

        assert_eq!(store.peek(&key("key1")), Some("value2".to_string()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.peek_entry(&key("key1")).unwrap().revision, 1);
    }

    #[test]
    fn test_store_lru_eviction() {
        let store = store(3);

        store.set(key("key1"), "value1".to_string()).unwrap();
        store.set(key("key2"), "value2".to_string()).unwrap();
        store.set(key("key3"), "value3".to_string()).unwrap();

        // Store is full, adding key4 should evict key1 (oldest)
        store.set(key("key4"), "value4".to_string()).unwrap();

        assert_eq!(store.len(), 3);
        assert!(!store.has(&key("key1")));
        let order: Vec<String> = store.snapshot().keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(order, vec![r#"["key4"]"#, r#"["key3"]"#, r#"["key2"]"#]);
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let store = store(2);

        store.set(key("a"), "1".to_string()).unwrap();
        store.set(key("b"), "2".to_string()).unwrap();

        // Access a to make it most recently used
        store.get(&key("a")).unwrap();

        // Adding c should evict b (now oldest)
        store.set(key("c"), "3".to_string()).unwrap();

        assert!(store.has(&key("a")));
        assert!(!store.has(&key("b")));
    }

    #[test]
    fn test_store_peek_and_has_do_not_reorder() {
        let store = store(2);

        store.set(key("a"), "1".to_string()).unwrap();
        store.set(key("b"), "2".to_string()).unwrap();
        assert!(store.has(&key("a")));
        assert_eq!(store.peek(&key("a")), Some("1".to_string()));

        store.set(key("c"), "3".to_string()).unwrap();
        assert!(!store.has(&key("a")));
    }

    #[test]
    fn test_store_events() {
        let store = store(1);
        let log = record(&store);

        store.set(key("a"), "1".to_string()).unwrap();
        store.get(&key("a")).unwrap();
        store.set(key("a"), "2".to_string()).unwrap();
        store.set(key("b"), "3".to_string()).unwrap();
        store.delete(&key("b")).unwrap();

        let log = log.lock().clone();
        assert_eq!(
            log,
            vec![
                (EventKind::Add, r#"["a"]"#.to_string(), None),
                (EventKind::Hit, r#"["a"]"#.to_string(), None),
                (EventKind::Update, r#"["a"]"#.to_string(), Some(Reason::Explicit)),
                (EventKind::Add, r#"["b"]"#.to_string(), None),
                (EventKind::Delete, r#"["a"]"#.to_string(), Some(Reason::Evicted)),
                (EventKind::Delete, r#"["b"]"#.to_string(), Some(Reason::Explicit)),
            ]
        );
    }

    #[test]
    fn test_store_clear_emits_per_entry() {
        let store = store(10);
        store.set(key("a"), "1".to_string()).unwrap();
        store.set(key("b"), "2".to_string()).unwrap();
        let log = record(&store);

        store.clear().unwrap();

        assert!(store.is_empty());
        let log = log.lock().clone();
        assert_eq!(
            log,
            vec![
                (EventKind::Delete, r#"["b"]"#.to_string(), Some(Reason::Cleared)),
                (EventKind::Delete, r#"["a"]"#.to_string(), Some(Reason::Cleared)),
            ]
        );
    }

    #[test]
    fn test_store_off_stops_delivery() {
        let store = store(10);
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = store.on(EventKind::Add, move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        store.set(key("a"), "1".to_string()).unwrap();
        assert!(store.off(EventKind::Add, id));
        store.set(key("b"), "2".to_string()).unwrap();

        assert_eq!(*count.lock(), 1);
        assert_eq!(store.listener_count(EventKind::Add), 0);
    }

    #[test]
    fn test_store_listener_can_reenter() {
        let store = store(10);
        let weak = store.downgrade();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        store.on(EventKind::Add, move |event| {
            if let Some(store) = weak.upgrade() {
                *slot.lock() = Some(store.has(&event.key));
            }
            Ok(())
        });

        store.set(key("a"), "1".to_string()).unwrap();
        assert_eq!(*seen.lock(), Some(true));
    }

    #[test]
    fn test_user_matcher_can_reenter() {
        let slot: Arc<Mutex<Option<WeakCacheStore<String>>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0usize));
        let (handle, counter) = (Arc::clone(&slot), Arc::clone(&calls));
        let matcher = KeyMatcher::WholeKey(Arc::new(move |stored: &Key, incoming: &Key| {
            let weak = handle.lock().clone();
            if let Some(store) = weak.and_then(|weak| weak.upgrade()) {
                *counter.lock() += store.len();
            }
            stored.to_string() == incoming.to_string()
        }));
        let store: CacheStore<String> = CacheStore::new(Capacity::Unbounded, matcher);
        *slot.lock() = Some(store.downgrade());

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = store.clone();
        std::thread::spawn(move || {
            worker.set(key("a"), "1".to_string()).unwrap();
            worker.set(key("b"), "2".to_string()).unwrap();
            worker.set(key("a"), "3".to_string()).unwrap();
            let found = worker.has(&key("b"));
            let value = worker.get(&key("a")).unwrap();
            let removed = worker.delete(&key("b")).unwrap();
            tx.send((found, value, removed)).unwrap();
        });

        let outcome = rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(outcome, Ok((true, Some("3".to_string()), true)));
        assert_eq!(store.len(), 1);
        assert!(*calls.lock() > 0);
    }

    #[test]
    fn test_store_listener_errors_propagate_after_all_listeners() {
        let store = store(10);
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        store.on(EventKind::Add, |_| Err(CacheError::InvalidExpiration("bad".to_string())));
        store.on(EventKind::Add, move |_| {
            *flag.lock() = true;
            Ok(())
        });

        let result = store.set(key("a"), "1".to_string());
        assert!(matches!(result, Err(CacheError::InvalidExpiration(_))));
        assert!(*ran.lock());
        assert!(store.has(&key("a")));
    }

    #[test]
    fn test_remove_if_current_checks_identity() {
        let store = store(10);
        store.set(key("a"), "1".to_string()).unwrap();
        let first = store.peek_entry(&key("a")).unwrap();

        store.delete(&key("a")).unwrap();
        store.set(key("a"), "2".to_string()).unwrap();

        // The original insertion is gone; the new one must survive.
        assert!(!store
            .remove_if_current(&key("a"), first.id, None, Reason::Expired)
            .unwrap());
        assert!(store.has(&key("a")));

        let second = store.peek_entry(&key("a")).unwrap();
        store.set(key("a"), "3".to_string()).unwrap();
        assert!(!store
            .remove_if_current(&key("a"), second.id, Some(second.revision), Reason::Rejected)
            .unwrap());
        assert!(store
            .remove_if_current(&key("a"), second.id, None, Reason::Expired)
            .unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_notify_update_keeps_value() {
        let store = store(10);
        store.set(key("a"), "1".to_string()).unwrap();
        let entry = store.peek_entry(&key("a")).unwrap();
        let log = record(&store);

        assert!(store
            .notify_update(&key("a"), entry.id, None, Reason::ExpirationReset)
            .unwrap());
        assert_eq!(store.peek(&key("a")), Some("1".to_string()));
        assert_eq!(
            log.lock().clone(),
            vec![(EventKind::Update, r#"["a"]"#.to_string(), Some(Reason::ExpirationReset))]
        );
    }

    #[test]
    fn test_unbounded_store() {
        let store: CacheStore<i64> = CacheStore::new(Capacity::Unbounded, KeyMatcher::Identity);
        for i in 0..1000 {
            store.set(Key::new(vec![Value::Int(i)]), i).unwrap();
        }
        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn test_deep_matcher_store() {
        let store: CacheStore<i64> = CacheStore::new(Capacity::Unbounded, KeyMatcher::Deep);
        let obj = || Key::new(vec![Value::map([("a", Value::map([("b", Value::Int(1))]))])]);

        store.set(obj(), 1).unwrap();
        store.set(obj(), 2).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.peek(&obj()), Some(2));
    }
}
