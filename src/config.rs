//! Configuration Module
//!
//! Option records for memoized computations, validated eagerly when built.
//!
//! Defaults can be loaded from environment variables with
//! [`MemoizeOptionsBuilder::from_env`].

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::error::{CacheError, Result};
use crate::key::{ArgMatcherFn, Key, KeyMatcher, KeyMatcherFn, KeyPipeline, ProjectionFn, SerializerFn, Value};
use crate::stats::StatsRegistry;

/// Environment variable holding the default capacity (`infinite` allowed).
pub const ENV_MAX_SIZE: &str = "MEMO_MAX_SIZE";
/// Environment variable holding the default max args.
pub const ENV_MAX_ARGS: &str = "MEMO_MAX_ARGS";
/// Environment variable holding the default max age in milliseconds.
pub const ENV_MAX_AGE_MS: &str = "MEMO_MAX_AGE_MS";
/// Environment variable holding the default stats profile name.
pub const ENV_PROFILE_NAME: &str = "MEMO_PROFILE_NAME";

/// Decides, per call, whether to bypass the cache and recompute.
pub type ForceUpdateFn = dyn Fn(&[Value]) -> bool + Send + Sync;
/// Computes an expiration duration in milliseconds for a new entry.
pub type ComputeAfterFn<V> = dyn Fn(&Key, &V, &CacheStore<V>) -> f64 + Send + Sync;
/// Returns true when a new entry should never expire.
pub type ShouldPersistFn<V> = dyn Fn(&Key, &V, &CacheStore<V>) -> bool + Send + Sync;
/// Consulted when a timer fires; false keeps the entry and re-arms it.
pub type ShouldRemoveFn<V> = dyn Fn(&Key, &V, Duration, &CacheStore<V>) -> bool + Send + Sync;

// == Capacity ==
/// Maximum number of entries a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Bounded(NonZeroUsize),
    Unbounded,
}

impl Capacity {
    /// Builds a bounded capacity, rejecting zero.
    pub fn bounded(max_entries: usize) -> Result<Self> {
        NonZeroUsize::new(max_entries)
            .map(Capacity::Bounded)
            .ok_or_else(|| CacheError::InvalidConfig("capacity must be a positive integer".to_string()))
    }

    /// Returns true when holding `len` entries exceeds this capacity.
    pub fn is_exceeded_by(&self, len: usize) -> bool {
        match self {
            Capacity::Bounded(max) => len > max.get(),
            Capacity::Unbounded => false,
        }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Bounded(NonZeroUsize::MIN)
    }
}

// == Serialization ==
#[derive(Clone, Default)]
pub enum Serialization {
    #[default]
    Disabled,
    /// Built-in deterministic serializer
    Default,
    Custom(Arc<SerializerFn>),
}

impl fmt::Debug for Serialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serialization::Disabled => f.write_str("Disabled"),
            Serialization::Default => f.write_str("Default"),
            Serialization::Custom(_) => f.write_str("Custom"),
        }
    }
}

// == Expiration ==
/// How long an entry lives.
pub enum ExpireAfter<V> {
    /// Fixed number of milliseconds, validated when options are built
    Millis(f64),
    /// Computed per entry, validated every time a timer is scheduled
    Compute(Arc<ComputeAfterFn<V>>),
}

impl<V> Clone for ExpireAfter<V> {
    fn clone(&self) -> Self {
        match self {
            ExpireAfter::Millis(ms) => ExpireAfter::Millis(*ms),
            ExpireAfter::Compute(f) => ExpireAfter::Compute(Arc::clone(f)),
        }
    }
}

/// Time-to-live policy for entries.
pub struct Expires<V> {
    pub after: ExpireAfter<V>,
    /// Restart the timer whenever the entry is hit
    pub update_on_hit: bool,
    pub should_persist: Option<Arc<ShouldPersistFn<V>>>,
    pub should_remove: Option<Arc<ShouldRemoveFn<V>>>,
}

impl<V> Clone for Expires<V> {
    fn clone(&self) -> Self {
        Self {
            after: self.after.clone(),
            update_on_hit: self.update_on_hit,
            should_persist: self.should_persist.clone(),
            should_remove: self.should_remove.clone(),
        }
    }
}

impl<V> fmt::Debug for Expires<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let after = match &self.after {
            ExpireAfter::Millis(ms) => format!("{}ms", ms),
            ExpireAfter::Compute(_) => "computed".to_string(),
        };
        f.debug_struct("Expires")
            .field("after", &after)
            .field("update_on_hit", &self.update_on_hit)
            .field("should_persist", &self.should_persist.is_some())
            .field("should_remove", &self.should_remove.is_some())
            .finish()
    }
}

impl<V> Expires<V> {
    pub fn after_millis(ms: f64) -> Self {
        Self::with_after(ExpireAfter::Millis(ms))
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Key, &V, &CacheStore<V>) -> f64 + Send + Sync + 'static,
    {
        Self::with_after(ExpireAfter::Compute(Arc::new(f)))
    }

    fn with_after(after: ExpireAfter<V>) -> Self {
        Self {
            after,
            update_on_hit: false,
            should_persist: None,
            should_remove: None,
        }
    }

    pub fn update_on_hit(mut self, enabled: bool) -> Self {
        self.update_on_hit = enabled;
        self
    }

    pub fn should_persist<F>(mut self, f: F) -> Self
    where
        F: Fn(&Key, &V, &CacheStore<V>) -> bool + Send + Sync + 'static,
    {
        self.should_persist = Some(Arc::new(f));
        self
    }

    pub fn should_remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&Key, &V, Duration, &CacheStore<V>) -> bool + Send + Sync + 'static,
    {
        self.should_remove = Some(Arc::new(f));
        self
    }

    /// Rejects fixed durations that are negative or non-finite.
    pub(crate) fn validate(&self) -> Result<()> {
        match self.after {
            ExpireAfter::Millis(ms) => millis_to_duration(ms).map(|_| ()),
            ExpireAfter::Compute(_) => Ok(()),
        }
    }

    /// Resolves the duration for one entry.
    pub(crate) fn duration_for(&self, key: &Key, value: &V, store: &CacheStore<V>) -> Result<Duration> {
        match &self.after {
            ExpireAfter::Millis(ms) => millis_to_duration(*ms),
            ExpireAfter::Compute(f) => millis_to_duration(f(key, value, store)),
        }
    }
}

/// Converts a millisecond count into a Duration, rejecting negative,
/// non-finite and out-of-range input.
pub fn millis_to_duration(ms: f64) -> Result<Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(CacheError::invalid_duration(ms));
    }
    Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| CacheError::invalid_duration(ms))
}

// == Stats Options ==
#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub registry: Arc<StatsRegistry>,
    /// Profile name; generated when absent
    pub name: Option<String>,
}

// == Memoize Options ==
/// Resolved, validated configuration for one memoized computation.
pub struct MemoizeOptions<V> {
    pub capacity: Capacity,
    pub equality: KeyMatcher,
    pub serialize: Serialization,
    pub max_args: Option<usize>,
    pub key_transform: Option<Arc<ProjectionFn>>,
    pub expires: Option<Expires<V>>,
    pub force_update: Option<Arc<ForceUpdateFn>>,
    pub stats: Option<StatsOptions>,
    /// Host-specific options the engine carries but never reads
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl<V> Clone for MemoizeOptions<V> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            equality: self.equality.clone(),
            serialize: self.serialize.clone(),
            max_args: self.max_args,
            key_transform: self.key_transform.clone(),
            expires: self.expires.clone(),
            force_update: self.force_update.clone(),
            stats: self.stats.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

impl<V> fmt::Debug for MemoizeOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizeOptions")
            .field("capacity", &self.capacity)
            .field("equality", &self.equality)
            .field("serialize", &self.serialize)
            .field("max_args", &self.max_args)
            .field("key_transform", &self.key_transform.is_some())
            .field("expires", &self.expires)
            .field("force_update", &self.force_update.is_some())
            .field("stats", &self.stats)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl<V> Default for MemoizeOptions<V> {
    fn default() -> Self {
        Self {
            capacity: Capacity::default(),
            equality: KeyMatcher::Identity,
            serialize: Serialization::Disabled,
            max_args: None,
            key_transform: None,
            expires: None,
            force_update: None,
            stats: None,
            extensions: BTreeMap::new(),
        }
    }
}

impl<V> MemoizeOptions<V> {
    /// Create a new options builder
    pub fn builder() -> MemoizeOptionsBuilder<V> {
        MemoizeOptionsBuilder::default()
    }

    /// Preset: no size bound.
    pub fn infinite() -> Self {
        Self {
            capacity: Capacity::Unbounded,
            ..Self::default()
        }
    }

    /// Preset: deep equality.
    pub fn deep() -> Self {
        Self {
            equality: KeyMatcher::Deep,
            ..Self::default()
        }
    }

    /// Preset: shallow equality.
    pub fn shallow() -> Self {
        Self {
            equality: KeyMatcher::Shallow,
            ..Self::default()
        }
    }

    /// Preset: serialized keys.
    pub fn serialized() -> Self {
        Self {
            serialize: Serialization::Default,
            ..Self::default()
        }
    }

    /// Preset: entries expire after `ms` milliseconds.
    pub fn max_age(ms: f64) -> Result<Self> {
        Self::builder().max_age(ms).build()
    }

    /// Defaults read from the `MEMO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        MemoizeOptionsBuilder::from_env()?.build()
    }

    /// Builds the key pipeline described by these options.
    pub fn key_pipeline(&self) -> KeyPipeline {
        let mut pipeline = KeyPipeline::new();
        if let Some(n) = self.max_args {
            pipeline = pipeline.with_max_args(n);
        }
        if let Some(project) = &self.key_transform {
            pipeline = pipeline.with_projection(Arc::clone(project));
        }
        match &self.serialize {
            Serialization::Disabled => pipeline,
            Serialization::Default => pipeline.with_default_serializer(),
            Serialization::Custom(f) => pipeline.with_serializer(Arc::clone(f)),
        }
    }

    /// Resolves the equality used by the store.
    ///
    /// Serialized keys are single strings, so any configured equality is
    /// replaced by plain string (identity) comparison.
    pub fn key_matcher(&self) -> KeyMatcher {
        match self.serialize {
            Serialization::Disabled => self.equality.clone(),
            _ => KeyMatcher::Identity,
        }
    }
}

// == Builder ==
/// Fluent builder for [`MemoizeOptions`].
pub struct MemoizeOptionsBuilder<V> {
    options: MemoizeOptions<V>,
    max_size: Option<usize>,
    max_age_ms: Option<f64>,
    profile_name: Option<String>,
}

impl<V> Default for MemoizeOptionsBuilder<V> {
    fn default() -> Self {
        Self {
            options: MemoizeOptions::default(),
            max_size: None,
            max_age_ms: None,
            profile_name: None,
        }
    }
}

impl<V> MemoizeOptionsBuilder<V> {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder seeded from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMO_MAX_SIZE` - Capacity, positive integer or `infinite`
    /// - `MEMO_MAX_ARGS` - Number of leading arguments used in keys
    /// - `MEMO_MAX_AGE_MS` - Expiration in milliseconds
    /// - `MEMO_PROFILE_NAME` - Stats profile name
    ///
    /// Unset variables keep defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::default();

        if let Some(raw) = lookup(ENV_MAX_SIZE) {
            builder = if raw.trim().eq_ignore_ascii_case("infinite") {
                builder.infinite()
            } else {
                builder.max_size(parse_env::<usize>(ENV_MAX_SIZE, &raw)?)
            };
        }
        if let Some(raw) = lookup(ENV_MAX_ARGS) {
            builder = builder.max_args(parse_env::<usize>(ENV_MAX_ARGS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MAX_AGE_MS) {
            builder = builder.max_age(parse_env::<f64>(ENV_MAX_AGE_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_PROFILE_NAME) {
            builder = builder.profile_name(raw);
        }

        Ok(builder)
    }

    /// Set maximum number of entries
    pub fn max_size(mut self, max_entries: usize) -> Self {
        self.max_size = Some(max_entries);
        self
    }

    /// Remove the size bound
    pub fn infinite(mut self) -> Self {
        self.max_size = None;
        self.options.capacity = Capacity::Unbounded;
        self
    }

    pub fn equality(mut self, matcher: KeyMatcher) -> Self {
        self.options.equality = matcher;
        self
    }

    pub fn deep(self) -> Self {
        self.equality(KeyMatcher::Deep)
    }

    pub fn shallow(self) -> Self {
        self.equality(KeyMatcher::Shallow)
    }

    /// Compare keys one argument at a time with `f`
    pub fn match_arg<F>(self, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        let f: Arc<ArgMatcherFn> = Arc::new(f);
        self.equality(KeyMatcher::PerArg(f))
    }

    /// Compare whole keys with `f` (stored key first)
    pub fn match_key<F>(self, f: F) -> Self
    where
        F: Fn(&Key, &Key) -> bool + Send + Sync + 'static,
    {
        let f: Arc<KeyMatcherFn> = Arc::new(f);
        self.equality(KeyMatcher::WholeKey(f))
    }

    pub fn serialize(mut self) -> Self {
        self.options.serialize = Serialization::Default;
        self
    }

    pub fn serializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> String + Send + Sync + 'static,
    {
        self.options.serialize = Serialization::Custom(Arc::new(f));
        self
    }

    pub fn max_args(mut self, n: usize) -> Self {
        self.options.max_args = Some(n);
        self
    }

    pub fn transform_args<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        self.options.key_transform = Some(Arc::new(f));
        self
    }

    /// Shorthand for a fixed expiration with no extra policy
    pub fn max_age(mut self, ms: f64) -> Self {
        self.max_age_ms = Some(ms);
        self.options.expires = None;
        self
    }

    pub fn expires(mut self, expires: Expires<V>) -> Self {
        self.max_age_ms = None;
        self.options.expires = Some(expires);
        self
    }

    pub fn force_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.options.force_update = Some(Arc::new(f));
        self
    }

    /// Record usage in `registry`
    pub fn stats(mut self, registry: Arc<StatsRegistry>) -> Self {
        self.options.stats = Some(StatsOptions { registry, name: None });
        self
    }

    /// Stats profile name; only used once a registry is set
    pub fn profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    /// Attach an opaque host-specific option
    pub fn extension(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.extensions.insert(name.into(), value);
        self
    }

    /// Validate and build the options
    pub fn build(mut self) -> Result<MemoizeOptions<V>> {
        if let Some(max_entries) = self.max_size {
            self.options.capacity = Capacity::bounded(max_entries)?;
        }
        if let Some(ms) = self.max_age_ms {
            self.options.expires = Some(Expires::after_millis(ms));
        }
        if let Some(expires) = &self.options.expires {
            expires.validate()?;
        }

        if let Some(stats) = self.options.stats.as_mut() {
            stats.name = self.profile_name;
        }

        Ok(self.options)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CacheError::InvalidConfig(format!("{} has an invalid value: {:?}", name, raw)))
}
