// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ops::Deref;
use std::time::{Duration, Instant};

/// A cached value together with the instant it expires at.
///
/// An entry is logically absent once the current time is past [`expires_at`][Self::expires_at],
/// even while it is still physically stored and waiting for the next sweep. A time-to-live
/// too large to represent as an [`Instant`] never expires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now.checked_add(ttl),
        }
    }

    /// Returns a reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the inner value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns the instant after which the entry is considered expired.
    ///
    /// Returns `None` for entries that never expire.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Returns the time left before the entry expires, or zero if it already has.
    ///
    /// Returns `None` for entries that never expire.
    #[must_use]
    pub fn time_to_live(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Returns `true` once `now` is strictly past the expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

impl<V> Deref for CacheEntry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
