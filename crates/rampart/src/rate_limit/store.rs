// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The ordered-set store behind the rate limiter.

use std::sync::Arc;
use std::time::Duration;

/// An error reported by a [`WindowStore`].
///
/// This is an opaque error that wraps whatever the backend reported. Use
/// [`std::error::Error::source`] to reach the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("window store operation failed: {cause}")]
pub struct StoreError {
    #[source]
    cause: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    /// Creates an error from any error or message.
    pub fn caused_by(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self { cause: cause.into() }
    }
}

/// Input of [`WindowStore::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitRequest<'a> {
    /// Fully qualified key of the ordered set.
    pub key: &'a str,
    /// Unique member inserted when the request is admitted.
    pub member: &'a str,
    /// Score of the new member, milliseconds since the UNIX epoch.
    pub now: u64,
    /// Oldest score still inside the window. Members scored below it are removed.
    pub window_start: u64,
    /// Members allowed inside the window.
    pub max_requests: u64,
    /// Expiry applied to the set after an insert.
    pub ttl: Duration,
}

/// Result of [`WindowStore::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitOutcome {
    /// Whether a member was inserted.
    pub admitted: bool,
    /// Members inside the window before the insert.
    pub count: u64,
}

/// A shared store of scored, ordered sets, one per rate-limit key.
///
/// The five primitives mirror sorted-set commands: scores are milliseconds since the
/// UNIX epoch and ranges are inclusive on both ends. Sets that become empty or whose
/// expiry passes are removed by the store.
///
/// [`admit`][Self::admit] has a provided implementation that issues the primitives one
/// after another. Concurrent callers may then both observe `count < max_requests` and
/// both insert, admitting at most one extra request per racing caller. Stores that can
/// execute the sequence atomically should override it.
pub trait WindowStore: Send + Sync {
    /// Removes members with a score in `min..=max` and returns how many were removed.
    fn remove_by_score(&self, key: &str, min: u64, max: u64) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Returns the number of members in the set. A missing set counts as empty.
    fn count(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Inserts `member` with `score`, or updates its score if already present.
    fn add(&self, key: &str, member: &str, score: u64) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Sets the set to expire after `ttl`. Has no effect on a missing set.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes the set.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Prunes the window, counts it and inserts `request.member` if there is room.
    fn admit(&self, request: &AdmitRequest<'_>) -> impl Future<Output = Result<AdmitOutcome, StoreError>> + Send {
        async move {
            if let Some(max) = request.window_start.checked_sub(1) {
                self.remove_by_score(request.key, 0, max).await?;
            }

            let count = self.count(request.key).await?;
            if count >= request.max_requests {
                return Ok(AdmitOutcome { admitted: false, count });
            }

            self.add(request.key, request.member, request.now).await?;
            self.expire(request.key, request.ttl).await?;

            Ok(AdmitOutcome { admitted: true, count })
        }
    }
}

impl<S: WindowStore> WindowStore for Arc<S> {
    fn remove_by_score(&self, key: &str, min: u64, max: u64) -> impl Future<Output = Result<u64, StoreError>> + Send {
        (**self).remove_by_score(key, min, max)
    }

    fn count(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send {
        (**self).count(key)
    }

    fn add(&self, key: &str, member: &str, score: u64) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).add(key, member, score)
    }

    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).expire(key, ttl)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).delete(key)
    }

    fn admit(&self, request: &AdmitRequest<'_>) -> impl Future<Output = Result<AdmitOutcome, StoreError>> + Send {
        (**self).admit(request)
    }
}
