//! Expiration Task
//!
//! Per-entry expiration timers driven by a store's events.
//!
//! Each live entry with a time-to-live owns one timer task on the tokio
//! runtime. Timers are keyed by [`EntryId`], so deleting an entry (for any
//! reason) cancels exactly its own timer, and a timer that fires looks the
//! entry up again by key before acting on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::cache::{CacheEvent, CacheStore, EntryId, EventKind, ListenerId, Reason, WeakCacheStore};
use crate::config::Expires;
use crate::error::{CacheError, Result};
use crate::key::Key;

// == Arm On ==
/// Which event starts an entry's expiration clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOn {
    /// As soon as the entry is added
    Add,
    /// When a pending async value resolves (`update` with reason `resolved`)
    Resolve,
}

// == Expiration Info ==
/// Introspection view of one pending timer.
#[derive(Debug, Clone)]
pub struct ExpirationInfo {
    pub key: Key,
    pub entry_id: EntryId,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct Timer {
    token: u64,
    key: Key,
    handle: JoinHandle<()>,
    scheduled_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

struct ExpirationState<V> {
    store: WeakCacheStore<V>,
    policy: Expires<V>,
    arm_on: ArmOn,
    runtime: Handle,
    timers: Mutex<HashMap<EntryId, Timer>>,
    next_token: AtomicU64,
}

// == Expiration Manager ==
/// Attaches time-to-live behaviour to a store.
pub struct ExpirationManager<V> {
    state: Arc<ExpirationState<V>>,
    listeners: Vec<(EventKind, ListenerId)>,
}

impl<V> ExpirationManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Subscribes to `store` and starts managing timers.
    ///
    /// Must be called from within a tokio runtime; timers are spawned on
    /// the runtime that was current at attach time.
    pub fn attach(store: &CacheStore<V>, policy: Expires<V>, arm_on: ArmOn) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            CacheError::RuntimeUnavailable(format!("expiration timers need a tokio runtime: {}", err))
        })?;
        policy.validate()?;

        let update_on_hit = policy.update_on_hit;
        let state = Arc::new(ExpirationState {
            store: store.downgrade(),
            policy,
            arm_on,
            runtime,
            timers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        });

        let mut listeners = Vec::new();

        let s = Arc::clone(&state);
        listeners.push((
            EventKind::Add,
            store.on(EventKind::Add, move |event| match s.arm_on {
                ArmOn::Add => s.arm(event),
                ArmOn::Resolve => Ok(()),
            }),
        ));

        let s = Arc::clone(&state);
        listeners.push((
            EventKind::Update,
            store.on(EventKind::Update, move |event| s.on_update(event)),
        ));

        if update_on_hit {
            let s = Arc::clone(&state);
            listeners.push((
                EventKind::Hit,
                store.on(EventKind::Hit, move |event| s.on_hit(event)),
            ));
        }

        let s = Arc::clone(&state);
        listeners.push((
            EventKind::Delete,
            store.on(EventKind::Delete, move |event| {
                s.cancel(event.entry_id);
                Ok(())
            }),
        ));

        Ok(Self { state, listeners })
    }

    /// Pending timers, soonest first.
    pub fn expirations(&self) -> Vec<ExpirationInfo> {
        let mut infos: Vec<ExpirationInfo> = self
            .state
            .timers
            .lock()
            .iter()
            .map(|(id, timer)| ExpirationInfo {
                key: timer.key.clone(),
                entry_id: *id,
                scheduled_at: timer.scheduled_at,
                expires_at: timer.expires_at,
            })
            .collect();
        infos.sort_by_key(|info| info.expires_at);
        infos
    }

    pub fn pending_timers(&self) -> usize {
        self.state.timers.lock().len()
    }

    /// Unsubscribes from the store and cancels every pending timer.
    pub fn detach(self) {
        if let Some(store) = self.state.store.upgrade() {
            for (kind, id) in &self.listeners {
                store.off(*kind, *id);
            }
        }
        for (_, timer) in self.state.timers.lock().drain() {
            timer.handle.abort();
        }
    }
}

impl<V> ExpirationState<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Starts (or restarts) the clock for the entry in `event`, unless the
    /// persist predicate keeps it forever.
    fn arm(self: &Arc<Self>, event: &CacheEvent<V>) -> Result<()> {
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };

        if let Some(should_persist) = &self.policy.should_persist {
            if should_persist(&event.key, &event.value, &store) {
                self.cancel(event.entry_id);
                return Ok(());
            }
        }

        let duration = self.policy.duration_for(&event.key, &event.value, &store)?;
        self.schedule(event.entry_id, event.key.clone(), duration)
    }

    fn on_update(self: &Arc<Self>, event: &CacheEvent<V>) -> Result<()> {
        match (event.reason, self.arm_on) {
            (Some(Reason::Resolved), ArmOn::Resolve) => self.arm(event),
            (Some(Reason::Explicit | Reason::Forced), ArmOn::Add) => self.arm(event),
            // The new pending value restarts the clock once it resolves.
            (Some(Reason::Explicit | Reason::Forced), ArmOn::Resolve) => {
                self.cancel(event.entry_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Restarts the clock on access, only for entries already counting down.
    fn on_hit(self: &Arc<Self>, event: &CacheEvent<V>) -> Result<()> {
        if !self.timers.lock().contains_key(&event.entry_id) {
            return Ok(());
        }
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };
        let duration = self.policy.duration_for(&event.key, &event.value, &store)?;
        self.schedule(event.entry_id, event.key.clone(), duration)
    }

    /// Fails without touching any existing timer when the deadline is past
    /// what the runtime clock can represent.
    fn schedule(self: &Arc<Self>, id: EntryId, key: Key, duration: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now()
            .checked_add(duration)
            .ok_or_else(|| CacheError::deadline_overflow(duration))?;
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        // The record is inserted before the task can observe the table.
        let mut timers = self.timers.lock();
        let state = Arc::clone(self);
        let task_key = key.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            state.fire(id, token, task_key, duration);
        });

        let timer = Timer {
            token,
            key,
            handle,
            scheduled_at: now,
            expires_at,
        };
        if let Some(previous) = timers.insert(id, timer) {
            previous.handle.abort();
        }
        Ok(())
    }

    fn cancel(&self, id: EntryId) {
        if let Some(timer) = self.timers.lock().remove(&id) {
            timer.handle.abort();
        }
    }

    fn fire(self: &Arc<Self>, id: EntryId, token: u64, key: Key, elapsed: Duration) {
        {
            let mut timers = self.timers.lock();
            // Cancelled or superseded while this task was waking up.
            if timers.get(&id).map(|timer| timer.token) != Some(token) {
                return;
            }
            timers.remove(&id);
        }

        let Some(store) = self.store.upgrade() else {
            return;
        };
        let Some(entry) = store.peek_entry(&key) else {
            return;
        };
        if entry.id != id {
            return;
        }

        if let Some(should_remove) = &self.policy.should_remove {
            if !should_remove(&key, &entry.value, elapsed, &store) {
                debug!(key = %key, "expiration reset");
                match store.notify_update(&key, id, None, Reason::ExpirationReset) {
                    Ok(true) => {
                        let rearmed = self
                            .policy
                            .duration_for(&key, &entry.value, &store)
                            .and_then(|duration| self.schedule(id, key.clone(), duration));
                        if let Err(err) = rearmed {
                            error!(key = %key, error = %err, "failed to re-arm expiration");
                        }
                    }
                    Ok(false) => {}
                    Err(err) => error!(key = %key, error = %err, "expiration reset listener failed"),
                }
                return;
            }
        }

        match store.remove_if_current(&key, id, None, Reason::Expired) {
            Ok(true) => debug!(key = %key, "entry expired"),
            Ok(false) => {}
            Err(err) => error!(key = %key, error = %err, "expiration listener failed"),
        }
    }
}
