// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deserializable settings for every component.
//!
//! Components never read configuration on their own. Load a [`Settings`] document at
//! startup and hand each section to the component it configures. Every field has a
//! default and unknown fields are rejected, so a typo fails loudly instead of being
//! ignored.
//!
//! ```
//! use rampart::config::Settings;
//!
//! let settings = Settings::from_json(r#"{
//!     "rate_limit": { "window_ms": 1000, "max_requests": 5 },
//!     "breaker": { "failure_threshold": 3 }
//! }"#)?;
//!
//! assert_eq!(settings.rate_limit.limit().max_requests, 5);
//! assert_eq!(settings.breaker.options().failure_threshold, 3);
//! assert_eq!(settings.retry.max_attempts, 3);
//! # Ok::<(), rampart::config::Error>(())
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::alerts::AlertSink;
use crate::breaker::BreakerOptions;
use crate::rate_limit::{FailurePolicy, RateLimit};
use crate::retry::Retry;

/// An error returned by [`Settings::from_json`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The document is not valid JSON or does not match the schema.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid settings: {0}")]
    Invalid(&'static str),
}

/// Settings of all components.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct Settings {
    /// Rate limiter settings.
    pub rate_limit: RateLimitSettings,
    /// Circuit breaker settings.
    pub breaker: BreakerSettings,
    /// Retry settings.
    pub retry: RetrySettings,
    /// TTL cache settings.
    pub cache: CacheSettings,
    /// Alert sink settings.
    pub alerts: AlertSettings,
}

impl Settings {
    /// Parses and validates a JSON settings document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for invalid JSON, unknown fields or wrong types and
    /// [`Error::Invalid`] for values no component accepts.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.rate_limit.window_ms == 0 {
            return Err(Error::Invalid("rate_limit.window_ms must be positive"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(Error::Invalid("cache.sweep_interval_secs must be positive"));
        }
        Ok(())
    }
}

/// Settings of the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct RateLimitSettings {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per window.
    pub max_requests: u64,
    /// Decision taken by [`is_allowed_or`][crate::rate_limit::RateLimiter::is_allowed_or]
    /// when the store fails.
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            failure_policy: FailurePolicy::FailClosed,
        }
    }
}

impl RateLimitSettings {
    /// Returns the configured limit.
    #[must_use]
    pub fn limit(&self) -> RateLimit {
        RateLimit::new(self.max_requests, Duration::from_millis(self.window_ms))
    }
}

/// Settings of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct BreakerSettings {
    /// Failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Milliseconds an open breaker waits before a trial call.
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl BreakerSettings {
    /// Returns the configured breaker options.
    #[must_use]
    pub fn options(&self) -> BreakerOptions {
        BreakerOptions {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

/// Settings of a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct RetrySettings {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds; the wait after attempt `n` is `delay_ms * n`.
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl RetrySettings {
    /// Applies the settings to `retry`.
    #[must_use]
    pub fn apply<E>(&self, retry: Retry<E>) -> Retry<E> {
        retry
            .max_attempts(self.max_attempts)
            .delay(Duration::from_millis(self.delay_ms))
    }
}

/// Settings of a TTL cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct CacheSettings {
    /// TTL of entries stored without an explicit one, in seconds.
    pub default_ttl_secs: u64,
    /// Interval between background sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheSettings {
    /// Returns the default entry TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the sweep interval.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Settings of the alert sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct AlertSettings {
    /// Alerts retained in the log.
    pub capacity: usize,
    /// Attempts above which an auth failure alert becomes critical.
    pub auth_failure_threshold: u32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            auth_failure_threshold: 5,
        }
    }
}

impl AlertSettings {
    /// Applies the settings to `sink`.
    #[must_use]
    pub fn apply(&self, sink: AlertSink) -> AlertSink {
        sink.capacity(self.capacity)
            .auth_failure_threshold(self.auth_failure_threshold)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Clock, Context};

    #[test]
    fn empty_document_yields_defaults() {
        let settings = Settings::from_json("{}").unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.rate_limit.limit(), RateLimit::per_minute(100));
        assert_eq!(settings.rate_limit.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(settings.breaker.options(), BreakerOptions::default());
        assert_eq!(settings.cache.default_ttl(), crate::cache::DEFAULT_TTL);
        assert_eq!(settings.cache.sweep_interval(), crate::cache::DEFAULT_SWEEP_INTERVAL);
        assert_eq!(settings.alerts.capacity, crate::alerts::DEFAULT_CAPACITY);
        assert_eq!(settings.retry.max_attempts, crate::retry::DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::from_json(
            r#"{
                "rate_limit": { "max_requests": 5, "failure_policy": "fail_open" },
                "retry": { "delay_ms": 250 },
                "alerts": { "capacity": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.rate_limit.window_ms, 60_000);
        assert_eq!(settings.rate_limit.max_requests, 5);
        assert_eq!(settings.rate_limit.failure_policy, FailurePolicy::FailOpen);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.delay_ms, 250);
        assert_eq!(settings.alerts.auth_failure_threshold, 5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = Settings::from_json(r#"{ "breaker": { "threshold": 3 } }"#).unwrap_err();

        assert!(matches!(error, Error::Malformed(_)));
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn zero_window_is_invalid() {
        let error = Settings::from_json(r#"{ "rate_limit": { "window_ms": 0 } }"#).unwrap_err();

        assert!(matches!(error, Error::Invalid(_)));
    }

    #[test]
    fn sections_configure_components() {
        let settings = Settings::from_json(
            r#"{ "retry": { "max_attempts": 7 }, "alerts": { "capacity": 2, "auth_failure_threshold": 1 } }"#,
        )
        .unwrap();
        let context = Context::new(Clock::new_frozen());

        let retry = settings.retry.apply(Retry::<String>::new(&context));
        assert!(format!("{retry:?}").contains("max_attempts: 7"));

        let sink = settings.alerts.apply(AlertSink::new(&context));
        assert_eq!(sink.auth_failure("u1", 1).severity(), crate::alerts::Severity::Warning);
        assert_eq!(sink.auth_failure("u1", 2).severity(), crate::alerts::Severity::Critical);
        sink.auth_failure("u1", 3);
        assert_eq!(sink.len(), 2);
    }
}
