//! In-memory loading cache with a toggleable backpressure policy
//!
//! On a miss the cache calls a caller-supplied loader. Under
//! [`CachePolicy::SpeedFirst`] every miss runs its loader immediately, with no
//! limit and no coalescing of identical in-flight misses. Under
//! [`CachePolicy::Contained`] loaders first pass a shared [`AdmissionGate`],
//! so at most `max_loads` of them run at once across all keys.
//!
//! Entries are never evicted or expired; only [`Cache::clear`] removes them.

use crate::error::{AdmissionError, CacheError, Result};
use crate::stability::AdmissionGate;
use parking_lot::RwLock;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default gate capacity for the contained policy
pub const DEFAULT_MAX_LOADS: usize = 5;

/// Environment switch enabling the contained policy when set to `1`
pub const CONTAINED_CACHE_ENV: &str = "CONTAINED_CACHE";

/// Environment variable holding the contained gate capacity
pub const MAX_LOADS_ENV: &str = "CACHE_MAX_LOADS";

/// How misses are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CachePolicy {
    /// Run every loader immediately; no limit, no coalescing
    SpeedFirst,
    /// Route loaders through a gate admitting `max_loads` at a time
    Contained {
        /// Gate capacity shared by all keys
        max_loads: usize,
    },
}

impl CachePolicy {
    /// Gate capacity, if the policy has a gate
    pub fn max_loads(&self) -> Option<usize> {
        match self {
            CachePolicy::SpeedFirst => None,
            CachePolicy::Contained { max_loads } => Some(*max_loads),
        }
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachePolicy::SpeedFirst => write!(f, "SPEED_FIRST"),
            CachePolicy::Contained { .. } => write!(f, "CONTAINED"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Miss-filling policy
    pub policy: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::SpeedFirst,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set policy
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use the contained policy with the given gate capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn contained(self, max_loads: usize) -> Self {
        self.with_policy(CachePolicy::Contained { max_loads })
    }

    /// Read `CONTAINED_CACHE` and `CACHE_MAX_LOADS` from the environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contained = lookup(CONTAINED_CACHE_ENV).as_deref() == Some("1");
        if !contained {
            return Ok(Self::default());
        }

        let max_loads = match lookup(MAX_LOADS_ENV) {
            None => DEFAULT_MAX_LOADS,
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                AdmissionError::invalid_config(format!("{}={:?}: {}", MAX_LOADS_ENV, raw, e))
            })?,
        };
        if max_loads == 0 {
            return Err(AdmissionError::invalid_config(format!(
                "{} must be positive",
                MAX_LOADS_ENV
            )));
        }

        Ok(Self::new().contained(max_loads))
    }
}

/// Outcome of [`Cache::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<V> {
    /// The value handed to this caller
    pub value: V,
    /// Whether it came from the store without running the loader
    pub was_hit: bool,
}

impl<V> Lookup<V> {
    /// Whether this lookup was served from the store
    pub fn is_hit(&self) -> bool {
        self.was_hit
    }

    /// Take the value
    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V> From<Lookup<V>> for (V, bool) {
    fn from(lookup: Lookup<V>) -> Self {
        (lookup.value, lookup.was_hit)
    }
}

/// Loading cache keyed by `K`
///
/// Stored values are written once and never replaced; a fill that loses a
/// race for the same key is discarded, but its caller still receives the
/// value its own loader produced.
pub struct Cache<K, V> {
    policy: CachePolicy,
    store: RwLock<HashMap<K, V>>,
    gate: Option<AdmissionGate>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> Cache<K, V> {
    /// Create a new cache
    ///
    /// # Panics
    ///
    /// Panics if the policy is contained with `max_loads` of zero.
    pub fn new(config: CacheConfig) -> Self {
        let gate = config.policy.max_loads().map(AdmissionGate::new);

        tracing::info!(
            "Cache mode={} max_loads={}",
            config.policy,
            config
                .policy
                .max_loads()
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );

        Self {
            policy: config.policy,
            store: RwLock::new(HashMap::new()),
            gate,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a speed-first cache
    pub fn speed_first() -> Self {
        Self::new(CacheConfig::new())
    }

    /// Create a contained cache admitting `max_loads` concurrent loaders
    ///
    /// # Panics
    ///
    /// Panics if `max_loads` is zero.
    pub fn contained(max_loads: usize) -> Self {
        Self::new(CacheConfig::new().contained(max_loads))
    }

    /// Get a value, running `loader` on a miss
    ///
    /// A hit never takes the exclusive lock and never runs the loader. A miss
    /// is counted before the loader runs, so failed fills still count. A
    /// loader error is returned as [`CacheError::Loader`] and nothing is
    /// stored.
    pub async fn get<Q, F, Fut, E>(
        &self,
        key: &Q,
        loader: F,
    ) -> std::result::Result<Lookup<V>, CacheError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let cached = self.store.read().get(key).cloned();
        if let Some(value) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Lookup {
                value,
                was_hit: true,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = match &self.gate {
            None => loader().await,
            Some(gate) => {
                let _permit = gate.acquire().await?;
                loader().await
            }
        }
        .map_err(CacheError::Loader)?;

        let stored = {
            let mut store = self.store.write();
            if store.contains_key(key) {
                false
            } else {
                store.insert(key.to_owned(), value.clone());
                true
            }
        };

        if !stored {
            // The caller keeps its own value even though another fill won
            tracing::debug!("Cache fill lost race; returning caller's own value");
        }

        Ok(Lookup {
            value,
            was_hit: false,
        })
    }

    /// Remove every entry, returning how many were removed
    ///
    /// Hit and miss counters are left alone.
    pub fn clear(&self) -> usize {
        let evicted = {
            let mut store = self.store.write();
            let evicted = store.len();
            store.clear();
            evicted
        };

        tracing::info!("Cache cleared: evicted={}", evicted);
        evicted
    }

    /// Whether `key` is currently stored
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.read().contains_key(key)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    /// Lookups served from the store
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to run the loader
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// The policy fixed at construction
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Loaders currently holding a gate permit; always 0 under speed-first
    pub fn in_flight_loads(&self) -> usize {
        self.gate.as_ref().map_or(0, AdmissionGate::in_flight)
    }

    /// Close the admission gate so queued and future contained loads fail
    ///
    /// Hits keep working. Does nothing under speed-first.
    pub fn close(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
            tracing::info!("Cache admission gate closed");
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            entries: self.len(),
            policy: self.policy,
            max_loads: self.policy.max_loads(),
            in_flight_loads: self.in_flight_loads(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the store
    pub hits: u64,
    /// Lookups that ran the loader
    pub misses: u64,
    /// Current number of entries
    pub entries: usize,
    /// Miss-filling policy
    pub policy: CachePolicy,
    /// Gate capacity; `None` under speed-first
    pub max_loads: Option<usize>,
    /// Loaders currently admitted through the gate
    pub in_flight_loads: usize,
}

impl CacheStats {
    /// Fraction of lookups that were hits
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
