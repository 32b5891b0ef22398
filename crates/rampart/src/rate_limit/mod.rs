// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Distributed sliding-window rate limiting.
//!
//! [`RateLimiter`] keeps one ordered set per caller key in a [`WindowStore`]. Every
//! admitted request adds a unique member scored with the current time in milliseconds
//! since the UNIX epoch. A decision:
//!
//! 1. removes members older than `now - window`,
//! 2. counts the members left,
//! 3. admits the request and records it if the count is below `max_requests`.
//!
//! Because the counts live in the store, every service instance using the same store
//! shares the same budget. The set of an idle key expires after `⌈window / 1s⌉ + 1`
//! seconds.
//!
//! Store failures are never turned into a decision silently: [`RateLimiter::is_allowed`]
//! returns [`Error::StoreUnavailable`]. Callers that want a default can use
//! [`RateLimiter::is_allowed_or`] with an explicit [`FailurePolicy`]. The policy never
//! covers an invalid limit.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use rampart::rate_limit::{MemoryWindowStore, RateLimit, RateLimiter};
//! use rampart::{Clock, Context};
//!
//! # futures::executor::block_on(async {
//! let context = Context::new(Clock::new_frozen());
//! let limiter = RateLimiter::new(MemoryWindowStore::new(&context), &context);
//! let limit = RateLimit::new(2, Duration::from_secs(1));
//!
//! assert!(limiter.is_allowed("u1:/convert", limit).await?.allowed);
//! assert!(limiter.is_allowed("u1:/convert", limit).await?.allowed);
//!
//! let denied = limiter.is_allowed("u1:/convert", limit).await?;
//! assert!(!denied.allowed);
//! assert_eq!(denied.remaining, 0);
//! # Ok::<(), rampart::rate_limit::Error>(())
//! # }).unwrap();
//! ```

mod memory;
mod store;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

pub use memory::MemoryWindowStore;
pub use store::{AdmitOutcome, AdmitRequest, StoreError, WindowStore};

use parking_lot::Mutex;

use crate::alerts::AlertSink;
use crate::clock::from_unix_millis;
use crate::telemetry::Telemetry;
use crate::{Clock, Context};

/// Prefix prepended to caller keys to form store keys.
pub const KEY_PREFIX: &str = "rate_limit:";

const COMPONENT: &str = "rate_limiter";

/// Alert throttle entries kept before expired ones are pruned.
const ALERTED_KEYS_PRUNE_THRESHOLD: usize = 1024;

/// An error returned by [`RateLimiter`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The store could not be reached or failed the operation.
    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    /// The limit cannot be evaluated.
    #[error("invalid rate limit: {0}")]
    InvalidLimit(&'static str),
}

/// The request budget for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// Length of the sliding window. Must be at least one millisecond.
    pub window: Duration,
    /// Requests admitted per window. Zero denies every request.
    pub max_requests: u64,
}

impl RateLimit {
    /// Creates a limit of `max_requests` per `window`.
    #[must_use]
    pub const fn new(max_requests: u64, window: Duration) -> Self {
        Self { window, max_requests }
    }

    /// Creates a limit of `max_requests` per second.
    #[must_use]
    pub const fn per_second(max_requests: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    /// Creates a limit of `max_requests` per minute.
    #[must_use]
    pub const fn per_minute(max_requests: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    fn window_millis(self) -> Result<u64, Error> {
        match u64::try_from(self.window.as_millis()) {
            Ok(0) => Err(Error::InvalidLimit("window must be at least one millisecond")),
            Ok(millis) => Ok(millis),
            Err(_) => Err(Error::InvalidLimit("window is too large")),
        }
    }
}

/// The outcome of [`RateLimiter::is_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window after this one. Zero when denied.
    pub remaining: u64,
    /// Point at which the window is guaranteed to have room again.
    ///
    /// This is `now + window`, an upper bound; room may free up earlier as older
    /// requests leave the window.
    pub reset_at: SystemTime,
}

impl Decision {
    /// Returns how long the caller should wait before retrying, e.g. for a
    /// `Retry-After` header. Zero when the request was allowed.
    #[must_use]
    pub fn retry_after(&self, now: SystemTime) -> Duration {
        if self.allowed {
            return Duration::ZERO;
        }

        self.reset_at.duration_since(now).unwrap_or(Duration::ZERO)
    }
}

/// The window usage of a key, returned by [`RateLimiter::usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Usage {
    /// Requests recorded in the current window.
    pub count: u64,
    /// Requests that may still be admitted.
    pub remaining: u64,
    /// Upper bound for when the window has room again.
    pub reset_at: SystemTime,
}

/// How [`RateLimiter::is_allowed_or`] decides when the store fails.
///
/// The policy applies to [`Error::StoreUnavailable`] only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
pub enum FailurePolicy {
    /// Admit the request.
    FailOpen,
    /// Deny the request.
    FailClosed,
}

impl FailurePolicy {
    /// Returns the name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }
}

/// Sliding-window rate limiter over a [`WindowStore`]. See the [module documentation][self].
#[derive(Debug)]
pub struct RateLimiter<S> {
    store: S,
    clock: Clock,
    sequence: AtomicU64,
    alerts: Option<Arc<AlertSink>>,
    // Caller key to the unix millis before which no further alert is raised.
    alerted: Mutex<HashMap<String, u64>>,
    telemetry: Telemetry,
}

impl<S: WindowStore> RateLimiter<S> {
    /// Creates a limiter over `store`.
    pub fn new(store: S, context: &Context) -> Self {
        Self {
            store,
            clock: context.clock().clone(),
            sequence: AtomicU64::new(0),
            alerts: None,
            alerted: Mutex::new(HashMap::new()),
            telemetry: context.telemetry(COMPONENT, Cow::Borrowed(COMPONENT)),
        }
    }

    /// Sets the instance name attached to log events and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.telemetry.instance_name = name.into();
        self
    }

    /// Triggers a rate-limit-exceeded alert on `sink` when a key is denied.
    ///
    /// At most one alert is raised per key and window: denials of the same key within
    /// `limit.window` of an alerted denial are logged but not alerted.
    #[must_use]
    pub fn alerts(mut self, sink: Arc<AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decides whether a request for `key` may proceed and records it if so.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLimit`] for a window shorter than one millisecond and
    /// [`Error::StoreUnavailable`] when the store fails.
    pub async fn is_allowed(&self, key: &str, limit: RateLimit) -> Result<Decision, Error> {
        let window = limit.window_millis()?;
        let now = self.clock.unix_millis();
        let store_key = store_key(key);
        let member = self.next_member(now);

        let outcome = self
            .store
            .admit(&AdmitRequest {
                key: &store_key,
                member: &member,
                now,
                window_start: now.saturating_sub(window),
                max_requests: limit.max_requests,
                ttl: expiry(window),
            })
            .await?;

        let reset_at = from_unix_millis(now.saturating_add(window));

        if outcome.admitted {
            return Ok(Decision {
                allowed: true,
                remaining: limit.max_requests.saturating_sub(outcome.count).saturating_sub(1),
                reset_at,
            });
        }

        self.on_denied(key, limit, outcome.count, now, window);

        Ok(Decision {
            allowed: false,
            remaining: 0,
            reset_at,
        })
    }

    /// Like [`is_allowed`][Self::is_allowed], but maps a store failure to a decision
    /// according to `policy`.
    ///
    /// The failure is logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLimit`] for a window shorter than one millisecond,
    /// whatever the policy.
    pub async fn is_allowed_or(&self, key: &str, limit: RateLimit, policy: FailurePolicy) -> Result<Decision, Error> {
        match self.is_allowed(key, limit).await {
            Err(Error::StoreUnavailable(error)) => {
                if self.telemetry.logs_enabled {
                    tracing::event!(
                        name: "rampart.rate_limit.store_failure",
                        tracing::Level::ERROR,
                        pipeline.name = %self.telemetry.pipeline_name,
                        rate_limit.name = %self.telemetry.instance_name,
                        rate_limit.key = key,
                        rate_limit.policy = policy.as_str(),
                        error = %error,
                    );
                }
                self.telemetry.report("store_failure");

                let now = self.clock.system_time();
                let reset_at = now.checked_add(limit.window).unwrap_or(now);
                Ok(match policy {
                    FailurePolicy::FailOpen => Decision {
                        allowed: true,
                        remaining: limit.max_requests.saturating_sub(1),
                        reset_at,
                    },
                    FailurePolicy::FailClosed => Decision {
                        allowed: false,
                        remaining: 0,
                        reset_at,
                    },
                })
            }
            result => result,
        }
    }

    /// Returns the current window usage of `key` without recording a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLimit`] for a window shorter than one millisecond and
    /// [`Error::StoreUnavailable`] when the store fails.
    pub async fn usage(&self, key: &str, limit: RateLimit) -> Result<Usage, Error> {
        let window = limit.window_millis()?;
        let now = self.clock.unix_millis();
        let store_key = store_key(key);

        if let Some(max) = now.saturating_sub(window).checked_sub(1) {
            self.store.remove_by_score(&store_key, 0, max).await?;
        }
        let count = self.store.count(&store_key).await?;

        Ok(Usage {
            count,
            remaining: limit.max_requests.saturating_sub(count),
            reset_at: from_unix_millis(now.saturating_add(window)),
        })
    }

    /// Forgets every request recorded for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] when the store fails.
    pub async fn reset(&self, key: &str) -> Result<(), Error> {
        self.store.delete(&store_key(key)).await?;
        Ok(())
    }

    fn on_denied(&self, key: &str, limit: RateLimit, count: u64, now: u64, window: u64) {
        if self.telemetry.logs_enabled {
            tracing::event!(
                name: "rampart.rate_limit.denied",
                tracing::Level::DEBUG,
                pipeline.name = %self.telemetry.pipeline_name,
                rate_limit.name = %self.telemetry.instance_name,
                rate_limit.key = key,
                rate_limit.count = count,
                rate_limit.max_requests = limit.max_requests,
            );
        }
        self.telemetry.report("denied");

        if let Some(sink) = &self.alerts
            && self.should_alert(key, now, window)
        {
            sink.rate_limit_exceeded(key, limit.max_requests, limit.window);
        }
    }

    fn should_alert(&self, key: &str, now: u64, window: u64) -> bool {
        let mut alerted = self.alerted.lock();
        if alerted.get(key).is_some_and(|until| now < *until) {
            return false;
        }
        if alerted.len() >= ALERTED_KEYS_PRUNE_THRESHOLD {
            alerted.retain(|_, until| now < *until);
        }
        alerted.insert(key.to_owned(), now.saturating_add(window));
        true
    }

    /// Timestamp, process-local sequence and random bits keep members unique across
    /// concurrent requests and service instances.
    fn next_member(&self, now: u64) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{now}-{sequence}-{:016x}", fastrand::u64(..))
    }
}

fn store_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

fn expiry(window_millis: u64) -> Duration {
    Duration::from_secs(window_millis.div_ceil(1000).saturating_add(1))
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use rstest::rstest;
    use static_assertions::assert_impl_all;
    use tracing_test::traced_test;

    use super::*;
    use crate::ClockControl;
    use crate::alerts::Category;

    /// Delegates to a memory store and fails every call while `failing` is set.
    #[derive(Debug)]
    struct FlakyStore {
        inner: MemoryWindowStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::caused_by("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    impl WindowStore for FlakyStore {
        async fn remove_by_score(&self, key: &str, min: u64, max: u64) -> Result<u64, StoreError> {
            self.check()?;
            self.inner.remove_by_score(key, min, max).await
        }

        async fn count(&self, key: &str) -> Result<u64, StoreError> {
            self.check()?;
            self.inner.count(key).await
        }

        async fn add(&self, key: &str, member: &str, score: u64) -> Result<(), StoreError> {
            self.check()?;
            self.inner.add(key, member, score).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.check()?;
            self.inner.expire(key, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete(key).await
        }
    }

    fn limiter(control: &ClockControl) -> RateLimiter<MemoryWindowStore> {
        let context = Context::new(control.to_clock());
        RateLimiter::new(MemoryWindowStore::new(&context), &context)
    }

    fn flaky(control: &ClockControl) -> RateLimiter<FlakyStore> {
        let context = Context::new(control.to_clock());
        let store = FlakyStore {
            inner: MemoryWindowStore::new(&context),
            failing: AtomicBool::new(false),
        };
        RateLimiter::new(store, &context)
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(RateLimiter<MemoryWindowStore>: Send, Sync);
        assert_impl_all!(Error: std::error::Error, Send, Sync);
    }

    #[tokio::test]
    async fn remaining_counts_down_then_denies() {
        let control = ClockControl::new();
        let limiter = limiter(&control);
        let limit = RateLimit::new(5, Duration::from_secs(1));

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let decision = limiter.is_allowed("u1:/convert", limit).await.unwrap();
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, [4, 3, 2, 1, 0]);

        let denied = limiter.is_allowed("u1:/convert", limit).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn window_slides() {
        let control = ClockControl::new();
        let limiter = limiter(&control);
        let limit = RateLimit::new(1, Duration::from_millis(100));

        assert!(limiter.is_allowed("k", limit).await.unwrap().allowed);

        control.advance_millis(50);
        assert!(!limiter.is_allowed("k", limit).await.unwrap().allowed);

        control.advance_millis(100);
        assert!(limiter.is_allowed("k", limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn admitted_requests_never_exceed_limit_in_any_window() {
        let control = ClockControl::new();
        let limiter = limiter(&control);
        let limit = RateLimit::new(3, Duration::from_millis(100));

        let mut admitted = Vec::new();
        for _ in 0..100 {
            if limiter.is_allowed("k", limit).await.unwrap().allowed {
                admitted.push(control.elapsed().as_millis());
            }
            control.advance_millis(7);
        }

        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..].iter().take_while(|t| **t < start + 100).count();
            assert!(in_window <= 3, "{in_window} requests admitted within 100ms of {start}");
        }
        assert!(admitted.len() > 3);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let control = ClockControl::new();
        let limiter = limiter(&control);
        let limit = RateLimit::per_second(1);

        assert!(limiter.is_allowed("a", limit).await.unwrap().allowed);
        assert!(limiter.is_allowed("b", limit).await.unwrap().allowed);
        assert!(!limiter.is_allowed("a", limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn keys_are_prefixed_in_store() {
        let control = ClockControl::new();
        let limiter = limiter(&control);

        limiter.is_allowed("u1", RateLimit::per_minute(10)).await.unwrap();

        assert_eq!(limiter.store().count("rate_limit:u1").await.unwrap(), 1);
        assert_eq!(limiter.store().count("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_at_is_now_plus_window() {
        let control = ClockControl::new();
        control.advance(Duration::from_secs(10));
        let limiter = limiter(&control);
        let limit = RateLimit::new(1, Duration::from_secs(1));

        let allowed = limiter.is_allowed("k", limit).await.unwrap();
        assert_eq!(allowed.reset_at, SystemTime::UNIX_EPOCH + Duration::from_secs(11));
        assert_eq!(allowed.retry_after(SystemTime::UNIX_EPOCH), Duration::ZERO);

        control.advance_millis(400);
        let denied = limiter.is_allowed("k", limit).await.unwrap();
        assert_eq!(denied.reset_at, SystemTime::UNIX_EPOCH + Duration::from_millis(11_400));
        assert_eq!(
            denied.retry_after(SystemTime::UNIX_EPOCH + Duration::from_millis(10_400)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn usage_does_not_record() {
        let control = ClockControl::new();
        let limiter = limiter(&control);
        let limit = RateLimit::new(5, Duration::from_secs(1));

        limiter.is_allowed("k", limit).await.unwrap();
        limiter.is_allowed("k", limit).await.unwrap();

        let usage = limiter.usage("k", limit).await.unwrap();
        assert_eq!((usage.count, usage.remaining), (2, 3));
        assert_eq!(limiter.usage("k", limit).await.unwrap().count, 2);

        control.advance(Duration::from_secs(2));
        assert_eq!(limiter.usage("k", limit).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn reset_clears_key() {
        let control = ClockControl::new();
        let limiter = limiter(&control);
        let limit = RateLimit::per_minute(1);

        limiter.is_allowed("k", limit).await.unwrap();
        limiter.reset("k").await.unwrap();

        assert!(limiter.is_allowed("k", limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn zero_max_requests_denies_everything() {
        let control = ClockControl::new();
        let limiter = limiter(&control);

        let decision = limiter.is_allowed("k", RateLimit::per_second(0)).await.unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[rstest]
    #[case(Duration::ZERO)]
    #[case(Duration::from_micros(999))]
    #[tokio::test]
    async fn sub_millisecond_window_is_invalid(#[case] window: Duration) {
        let control = ClockControl::new();
        let limiter = limiter(&control);

        let error = limiter.is_allowed("k", RateLimit::new(1, window)).await.unwrap_err();

        assert!(matches!(error, Error::InvalidLimit(_)));
    }

    #[rstest]
    #[case(1, 2)]
    #[case(999, 2)]
    #[case(1000, 2)]
    #[case(1001, 3)]
    #[case(60_000, 61)]
    fn set_expiry_covers_window(#[case] window_millis: u64, #[case] seconds: u64) {
        assert_eq!(expiry(window_millis), Duration::from_secs(seconds));
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_error() {
        let control = ClockControl::new();
        let limiter = flaky(&control);
        limiter.store().failing.store(true, Ordering::SeqCst);

        let error = limiter.is_allowed("k", RateLimit::per_second(5)).await.unwrap_err();

        assert!(matches!(error, Error::StoreUnavailable(_)));
        assert!(limiter.usage("k", RateLimit::per_second(5)).await.is_err());
        assert!(limiter.reset("k").await.is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_policy_applies_on_store_failure() {
        let control = ClockControl::new();
        let limiter = flaky(&control);
        let limit = RateLimit::per_second(5);
        limiter.store().failing.store(true, Ordering::SeqCst);

        let open = limiter.is_allowed_or("k", limit, FailurePolicy::FailOpen).await.unwrap();
        assert!(open.allowed);
        assert_eq!(open.remaining, 4);

        let closed = limiter.is_allowed_or("k", limit, FailurePolicy::FailClosed).await.unwrap();
        assert!(!closed.allowed);

        assert!(logs_contain("rampart::rate_limit"));
        assert!(logs_contain("rate_limit.policy"));
        assert!(logs_contain("fail_open"));
        assert!(logs_contain("fail_closed"));
        assert!(logs_contain("connection refused"));

        limiter.store().failing.store(false, Ordering::SeqCst);
        let decision = limiter.is_allowed_or("k", limit, FailurePolicy::FailClosed).await.unwrap();
        assert_eq!(decision.remaining, 4);
    }

    #[traced_test]
    #[rstest]
    #[case(FailurePolicy::FailOpen)]
    #[case(FailurePolicy::FailClosed)]
    #[tokio::test]
    async fn failure_policy_does_not_cover_invalid_limit(#[case] policy: FailurePolicy) {
        let control = ClockControl::new();
        let limiter = limiter(&control);

        let error = limiter
            .is_allowed_or("k", RateLimit::new(1, Duration::ZERO), policy)
            .await
            .unwrap_err();

        assert!(matches!(error, Error::InvalidLimit(_)));
        assert_eq!(limiter.store().count("rate_limit:k").await.unwrap(), 0);
        assert!(!logs_contain("rate_limit.policy"));
    }

    #[tokio::test]
    async fn provided_admit_matches_atomic_admit() {
        let control = ClockControl::new();
        let limiter = flaky(&control);
        let limit = RateLimit::new(2, Duration::from_millis(100));

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(limiter.is_allowed("k", limit).await.unwrap().allowed);
            control.advance_millis(40);
        }

        assert_eq!(outcomes, [true, true, false, true]);
    }

    #[tokio::test]
    async fn denial_triggers_alert() {
        let control = ClockControl::new();
        let context = Context::new(control.to_clock());
        let sink = Arc::new(AlertSink::new(&context));
        let limiter = RateLimiter::new(MemoryWindowStore::new(&context), &context).alerts(Arc::clone(&sink));
        let limit = RateLimit::per_second(1);

        limiter.is_allowed("u1", limit).await.unwrap();
        assert!(sink.is_empty());

        limiter.is_allowed("u1", limit).await.unwrap();
        let alerts = sink.recent_alerts(10, Some(Category::Quota));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].details()["key"], "u1");
    }

    #[tokio::test]
    async fn alerts_are_throttled_per_key_and_window() {
        let control = ClockControl::new();
        let context = Context::new(control.to_clock());
        let sink = Arc::new(AlertSink::new(&context));
        let limiter = RateLimiter::new(MemoryWindowStore::new(&context), &context).alerts(Arc::clone(&sink));
        let limit = RateLimit::per_second(0);

        for _ in 0..5 {
            assert!(!limiter.is_allowed("u1", limit).await.unwrap().allowed);
            control.advance_millis(100);
        }
        assert_eq!(sink.len(), 1);

        limiter.is_allowed("u2", limit).await.unwrap();
        assert_eq!(sink.len(), 2);

        control.advance_millis(500);
        limiter.is_allowed("u1", limit).await.unwrap();
        assert_eq!(sink.len(), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn denial_is_logged() {
        let control = ClockControl::new();
        let limiter = limiter(&control).name("api");
        let limit = RateLimit::per_second(0);

        limiter.is_allowed("u9", limit).await.unwrap();

        assert!(logs_contain("rampart::rate_limit"));
        assert!(logs_contain("rate_limit.name=api"));
        assert!(logs_contain("rate_limit.max_requests=0"));
    }

    #[test]
    fn members_are_unique() {
        let limiter = limiter(&ClockControl::new());

        let first = limiter.next_member(5);
        let second = limiter.next_member(5);

        assert_ne!(first, second);
        assert!(first.starts_with("5-0-"));
        assert!(second.starts_with("5-1-"));
    }
}
