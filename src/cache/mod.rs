//! Cache Module
//!
//! Provides the in-memory store behind every memoized computation: LRU
//! ordering, bounded-size eviction and event notification.

mod entry;
mod event;
mod lru;
mod store;


// Re-export public types
pub use entry::{CacheSnapshot, Entry, EntryId};
pub(crate) use event::Listeners;
pub use event::{CacheEvent, EventKind, Listener, ListenerId, Reason};
pub use lru::RecencyList;
pub use store::{CacheStore, WeakCacheStore};
