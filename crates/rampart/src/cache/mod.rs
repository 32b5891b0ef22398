// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process key/value cache with per-entry time-to-live.
//!
//! [`TtlCache`] stores values together with an expiry instant. Expiry is evaluated
//! lazily: an expired entry is treated as absent by [`get`][TtlCache::get] and
//! [`has`][TtlCache::has] and removed on that access. Entries that are never read again
//! are reclaimed by [`cleanup`][TtlCache::cleanup], either called directly or from the
//! background task started with [`start_sweeper`][TtlCache::start_sweeper].
//!
//! The cache is a pure TTL cache: it has no size bound and no LRU eviction.
//! [`get_or_set`][TtlCache::get_or_set] does not merge concurrent misses, so two tasks
//! missing the same key at the same time both compute the value.
//!
//! # Defaults
//!
//! | Parameter | Default Value | Configured By |
//! |-----------|---------------|---------------|
//! | Entry TTL | `300` seconds | [`TtlCache::with_default_ttl`], [`TtlCache::set_with_ttl`] |
//! | Sweep interval | `300` seconds | [`TtlCache::start_sweeper`] argument, [`DEFAULT_SWEEP_INTERVAL`] |
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use rampart::cache::TtlCache;
//! use rampart::{ClockControl, Context};
//!
//! let control = ClockControl::new();
//! let cache = TtlCache::new(&Context::new(control.to_clock()));
//!
//! cache.set_with_ttl("plan:42".to_string(), "pro".to_string(), Duration::from_secs(1));
//! assert_eq!(cache.get("plan:42").as_deref(), Some("pro"));
//!
//! control.advance(Duration::from_millis(1_001));
//! assert_eq!(cache.get("plan:42"), None);
//! assert!(!cache.has("plan:42"));
//! ```

mod entry;
mod sweeper;

use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

pub use entry::CacheEntry;
use parking_lot::RwLock;
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, SweeperHandle};

use crate::telemetry::Telemetry;
use crate::{Clock, Context};

/// Time-to-live applied by [`TtlCache::set`] when no explicit TTL is given.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const COMPONENT: &str = "cache";

/// Entry counts reported by [`TtlCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct CacheStats {
    /// Number of physically stored entries.
    pub total: usize,
    /// Entries that have not expired yet.
    pub active: usize,
    /// Entries that expired but have not been removed yet.
    pub expired: usize,
}

/// A concurrent key/value cache with per-entry expiry.
///
/// Cloning the cache is inexpensive and every clone shares the same entries, which is how
/// one constructed instance is handed to every component that needs it.
///
/// See the [module documentation][self] for details and examples.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    pub(super) inner: Arc<Inner<K, V>>,
}

#[derive(Debug)]
pub(super) struct Inner<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    clock: Clock,
    default_ttl: Duration,
    telemetry: Telemetry,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates an empty cache using [`DEFAULT_TTL`] for entries inserted with [`set`][Self::set].
    #[must_use]
    pub fn new(context: &Context) -> Self {
        Self::with_default_ttl(context, DEFAULT_TTL)
    }

    /// Creates an empty cache with the given default time-to-live.
    #[must_use]
    pub fn with_default_ttl(context: &Context, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                clock: context.clock().clone(),
                default_ttl,
                telemetry: context.telemetry(COMPONENT, Cow::Borrowed("ttl_cache")),
            }),
        }
    }

    /// Returns the time-to-live used by [`set`][Self::set].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Inserts a value with the default time-to-live, replacing any previous entry.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.inner.default_ttl);
    }

    /// Inserts a value that expires after `ttl`, replacing any previous entry.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry::new(value, self.inner.clock.instant(), ttl);
        self.inner.entries.write().insert(key, entry);
    }

    /// Returns a clone of the value stored under `key`, or `None` if it is missing or expired.
    ///
    /// An expired entry found by this call is removed.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entry(key).map(CacheEntry::into_value)
    }

    /// Returns a clone of the live entry stored under `key`, including its expiry.
    ///
    /// An expired entry found by this call is removed.
    pub fn entry<Q>(&self, key: &Q) -> Option<CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.inner.clock.instant();

        {
            let entries = self.inner.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        self.remove_if_expired(key);
        None
    }

    /// Returns `true` if a live entry is stored under `key`.
    ///
    /// An expired entry found by this call is removed.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.inner.clock.instant();

        let expired = match self.inner.entries.read().get(key) {
            None => return false,
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            self.remove_if_expired(key);
        }

        !expired
    }

    /// Removes the entry stored under `key`, returning `true` if one was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries.write().remove(key).is_some()
    }

    /// Returns the cached value for `key`, computing and caching it on a miss.
    ///
    /// Concurrent misses for the same key are not merged; each caller runs `compute`.
    pub async fn get_or_set<F, Fut>(&self, key: K, compute: F, ttl: Duration) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }

        let value = compute().await;
        self.set_with_ttl(key, value.clone(), ttl);
        value
    }

    /// Returns the cached value for `key`, computing and caching it on a miss.
    ///
    /// Errors returned by `compute` are passed through and nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `compute`.
    pub async fn try_get_or_set<F, Fut, E>(&self, key: K, compute: F, ttl: Duration) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.set_with_ttl(key, value.clone(), ttl);
        Ok(value)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    /// Returns the number of physically stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Returns entry counts split by expiry state.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = self.inner.clock.instant();
        let entries = self.inner.entries.read();
        let expired = entries.values().filter(|entry| entry.is_expired(now)).count();

        CacheStats {
            total: entries.len(),
            active: entries.len() - expired,
            expired,
        }
    }

    fn remove_if_expired<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // The entry may have been replaced between dropping the read lock and taking the write lock.
        let now = self.inner.clock.instant();
        let mut entries = self.inner.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash,
{
    fn cleanup(&self) -> usize {
        let now = self.clock.instant();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            if self.telemetry.logs_enabled {
                tracing::event!(
                    name: "rampart.cache.sweep",
                    tracing::Level::DEBUG,
                    pipeline.name = %self.telemetry.pipeline_name,
                    cache.removed = removed,
                );
            }
            self.telemetry.report("sweep");
        }

        removed
    }
}
