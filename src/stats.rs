//! Statistics Module
//!
//! Tracks call/hit counters per named profile.
//!
//! A [`StatsRegistry`] is an explicit, shareable object: create one, hand
//! an `Arc` of it to every memoizer that should report into it, and query
//! it directly. Each memoizer attaches a [`StatsManager`] that subscribes
//! to its store's `add` and `hit` events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheStore, EventKind, ListenerId, WeakCacheStore};

// == Counters ==
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    calls: u64,
    hits: u64,
}

// == Reports ==
/// Usage of one profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileStats {
    pub calls: u64,
    pub hits: u64,
    pub name: String,
    /// `hits / calls` as a percentage with four decimals
    pub usage: String,
}

impl ProfileStats {
    fn new(name: &str, counters: Counters) -> Self {
        Self {
            calls: counters.calls,
            hits: counters.hits,
            name: name.to_string(),
            usage: usage(counters.calls, counters.hits),
        }
    }

    /// Hit rate in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.hits as f64 / self.calls as f64
        }
    }
}

/// Usage summed across every profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStats {
    pub calls: u64,
    pub hits: u64,
    pub profiles: BTreeMap<String, ProfileStats>,
    pub usage: String,
}

/// Answer to a stats query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsReport {
    Profile(ProfileStats),
    Global(GlobalStats),
    /// Collection is switched off; no data is reported
    NotCollecting,
}

/// Formats `hits / calls` as a percentage; `0.0000%` when there were no
/// calls.
pub fn usage(calls: u64, hits: u64) -> String {
    let ratio = if calls == 0 {
        0.0
    } else {
        hits as f64 / calls as f64
    };
    format!("{:.4}%", ratio * 100.0)
}

// == Stats Registry ==
/// Named profiles plus the switch that turns collection on and off.
///
/// Collection starts switched off.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    collecting: AtomicBool,
    profiles: Mutex<BTreeMap<String, Counters>>,
    anonymous_count: AtomicU64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that is already collecting.
    pub fn collecting() -> Self {
        let registry = Self::new();
        registry.start_collecting();
        registry
    }

    // == Switches ==
    /// Turns collection on for every profile, existing or future.
    pub fn start_collecting(&self) {
        self.collecting.store(true, Ordering::SeqCst);
    }

    /// Turns collection off and zeroes every profile's counters.
    pub fn stop_collecting(&self) {
        self.collecting.store(false, Ordering::SeqCst);
        for counters in self.profiles.lock().values_mut() {
            *counters = Counters::default();
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    // == Profiles ==
    /// Makes sure a profile exists.
    pub fn register(&self, name: &str) {
        self.profiles.lock().entry(name.to_string()).or_default();
    }

    /// Generates a profile name for a memoizer that was not given one.
    pub fn anonymous_name(&self) -> String {
        let n = self.anonymous_count.fetch_add(1, Ordering::SeqCst) + 1;
        format!("Anonymous {}", n)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.lock().keys().cloned().collect()
    }

    pub(crate) fn record_call(&self, name: &str) {
        self.record(name, false);
    }

    pub(crate) fn record_hit(&self, name: &str) {
        self.record(name, true);
    }

    fn record(&self, name: &str, hit: bool) {
        if !self.is_collecting() {
            return;
        }
        let mut profiles = self.profiles.lock();
        let counters = profiles.entry(name.to_string()).or_default();
        counters.calls += 1;
        if hit {
            counters.hits += 1;
        }
    }

    // == Queries ==
    /// Stats for one profile, or the global aggregate when `name` is None.
    ///
    /// Returns [`StatsReport::NotCollecting`] (and logs a warning) while
    /// collection is switched off. Unknown profile names report zeros.
    pub fn stats(&self, name: Option<&str>) -> StatsReport {
        if !self.is_collecting() {
            warn!("stats requested while not collecting; call start_collecting first");
            return StatsReport::NotCollecting;
        }

        let profiles = self.profiles.lock();
        match name {
            Some(name) => StatsReport::Profile(ProfileStats::new(
                name,
                profiles.get(name).copied().unwrap_or_default(),
            )),
            None => {
                let (calls, hits) = profiles
                    .values()
                    .fold((0, 0), |(c, h), p| (c + p.calls, h + p.hits));
                StatsReport::Global(GlobalStats {
                    calls,
                    hits,
                    profiles: profiles
                        .iter()
                        .map(|(name, counters)| (name.clone(), ProfileStats::new(name, *counters)))
                        .collect(),
                    usage: usage(calls, hits),
                })
            }
        }
    }

    /// Zeroes one profile, or every profile when `name` is None.
    pub fn clear_stats(&self, name: Option<&str>) {
        let mut profiles = self.profiles.lock();
        match name {
            Some(name) => {
                if let Some(counters) = profiles.get_mut(name) {
                    *counters = Counters::default();
                }
            }
            None => {
                for counters in profiles.values_mut() {
                    *counters = Counters::default();
                }
            }
        }
    }
}

// == Stats Manager ==
/// Counts one store's calls and hits into a registry profile.
///
/// `add` counts a call; `hit` counts a call and a hit.
pub struct StatsManager<V> {
    store: WeakCacheStore<V>,
    registry: Arc<StatsRegistry>,
    name: String,
    listeners: [(EventKind, ListenerId); 2],
}

impl<V> StatsManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn attach(store: &CacheStore<V>, registry: Arc<StatsRegistry>, name: impl Into<String>) -> Self {
        let name = name.into();
        registry.register(&name);

        let add_id = {
            let registry = Arc::clone(&registry);
            let name = name.clone();
            store.on(EventKind::Add, move |_| {
                registry.record_call(&name);
                Ok(())
            })
        };
        let hit_id = {
            let registry = Arc::clone(&registry);
            let name = name.clone();
            store.on(EventKind::Hit, move |_| {
                registry.record_hit(&name);
                Ok(())
            })
        };

        Self {
            store: store.downgrade(),
            registry,
            name,
            listeners: [(EventKind::Add, add_id), (EventKind::Hit, hit_id)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<StatsRegistry> {
        &self.registry
    }

    /// This profile's current report.
    pub fn stats(&self) -> StatsReport {
        self.registry.stats(Some(&self.name))
    }

    /// Stops counting for this store and zeroes its profile.
    pub fn detach(self) {
        if let Some(store) = self.store.upgrade() {
            for (kind, id) in self.listeners {
                store.off(kind, id);
            }
        }
        self.registry.clear_stats(Some(&self.name));
    }
}
