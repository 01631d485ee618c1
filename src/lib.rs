//! Memo Cache - A function-result caching engine
//!
//! Wraps computations so repeated calls with matching arguments reuse the
//! stored result. Provides LRU eviction, configurable key equality, TTL
//! expiration, async result sharing and usage statistics.

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod memoize;
pub mod stats;
pub mod tasks;

pub use cache::{CacheEvent, CacheSnapshot, CacheStore, EventKind, Reason};
pub use config::{Capacity, Expires, MemoizeOptions, MemoizeOptionsBuilder};
pub use error::{CacheError, Result};
pub use key::{Key, KeyMatcher, Value};
pub use memoize::{memoize, memoize_async, AsyncMemoized, AsyncOptions, MemoCache, Memoized};
pub use stats::{StatsRegistry, StatsReport};
pub use tasks::{pending, resolved, Pending};
