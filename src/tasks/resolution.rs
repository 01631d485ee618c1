//! Pending value resolution.
//!
//! Async memoizers cache the *pending* result of a call so concurrent
//! callers share one computation. A watcher task follows each pending
//! value: success is announced as `update(resolved)`, failure removes the
//! entry with `delete(rejected)` so the next call retries.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::cache::{CacheEvent, CacheStore, EventKind, ListenerId, Reason, WeakCacheStore};
use crate::error::{CacheError, Result};

/// A shareable, cloneable in-flight result.
pub type Pending<T, E> = Shared<BoxFuture<'static, std::result::Result<T, E>>>;

/// Wraps a future so it can be stored and awaited by many callers.
pub fn pending<T, E, F>(future: F) -> Pending<T, E>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Clone,
    E: Clone,
{
    future.boxed().shared()
}

/// An already-settled pending value.
pub fn resolved<T, E>(value: T) -> Pending<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pending(async move { Ok(value) })
}

// == Pending Resolver ==
/// Follows pending values in a store until they settle.
pub struct PendingResolver<T, E> {
    store: WeakCacheStore<Pending<T, E>>,
    listeners: [(EventKind, ListenerId); 2],
}

impl<T, E> PendingResolver<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Watches every pending value stored in `store` from now on.
    pub fn attach(store: &CacheStore<Pending<T, E>>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            CacheError::RuntimeUnavailable(format!("async memoization needs a tokio runtime: {}", err))
        })?;

        let add_id = {
            let runtime = runtime.clone();
            let weak = store.downgrade();
            store.on(EventKind::Add, move |event| {
                watch(&runtime, weak.clone(), event);
                Ok(())
            })
        };
        let update_id = {
            let weak = store.downgrade();
            store.on(EventKind::Update, move |event| {
                if matches!(event.reason, Some(Reason::Explicit | Reason::Forced)) {
                    watch(&runtime, weak.clone(), event);
                }
                Ok(())
            })
        };

        Ok(Self {
            store: store.downgrade(),
            listeners: [(EventKind::Add, add_id), (EventKind::Update, update_id)],
        })
    }

    pub fn detach(self) {
        if let Some(store) = self.store.upgrade() {
            for (kind, id) in self.listeners {
                store.off(kind, id);
            }
        }
    }
}

fn watch<T, E>(runtime: &Handle, weak: WeakCacheStore<Pending<T, E>>, event: &CacheEvent<Pending<T, E>>)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let pending = event.value.clone();
    let key = event.key.clone();
    let (id, revision) = (event.entry_id, event.revision);

    runtime.spawn(async move {
        let outcome = pending.await;
        let Some(store) = weak.upgrade() else {
            return;
        };

        match outcome {
            Ok(_) => {
                if let Err(err) = store.notify_update(&key, id, Some(revision), Reason::Resolved) {
                    // Typically an expiration that could not be armed.
                    error!(key = %key, error = %err, "resolution listener failed; removing entry");
                    if let Err(err) = store.remove_if_current(&key, id, Some(revision), Reason::Rejected) {
                        error!(key = %key, error = %err, "rejection listener failed");
                    }
                }
            }
            Err(_) => match store.remove_if_current(&key, id, Some(revision), Reason::Rejected) {
                Ok(true) => debug!(key = %key, "removed rejected entry"),
                Ok(false) => {}
                Err(err) => error!(key = %key, error = %err, "rejection listener failed"),
            },
        }
    });
}
