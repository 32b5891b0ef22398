// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded retries with linear backoff.
//!
//! [`Retry`] invokes a fallible async operation up to `max_attempts` times. After a failed
//! attempt `n` (1-based) it waits `delay * n` before the next one, so the default settings
//! (3 attempts, 1 second) wait 1s and then 2s. There is no jitter.
//!
//! When every attempt fails, the last error is returned inside [`RetryExhausted`] together
//! with the number of attempts made.
//!
//! Retries multiply load on a struggling dependency. Wrap the retrying call in a
//! [`CircuitBreaker`][crate::breaker::CircuitBreaker] rather than the other way around so
//! the breaker sees one outcome per logical call.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use rampart::retry::Retry;
//! use rampart::{ClockControl, Context};
//!
//! # futures::executor::block_on(async {
//! let control = ClockControl::new();
//! let retry = Retry::new(&Context::new(control.to_clock()))
//!     .max_attempts(3)
//!     .delay(Duration::from_millis(100));
//!
//! let value = retry
//!     .execute(|attempt| async move {
//!         if attempt.is_last() { Ok(42) } else { Err("flaky") }
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(value, 42);
//! assert_eq!(control.elapsed(), Duration::from_millis(300));
//! # });
//! ```

use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use crate::telemetry::Telemetry;
use crate::{Clock, Context};

/// Attempts made when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts when none is configured.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

const COMPONENT: &str = "retry";

/// A single attempt of a retried operation.
///
/// Indices are 0-based; [`number`][Self::number] gives the 1-based position used in logs
/// and in the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    index: u32,
    is_last: bool,
}

impl Default for Attempt {
    fn default() -> Self {
        Self::new(0, true)
    }
}

impl Attempt {
    /// Creates an attempt with the given 0-based index.
    #[must_use]
    pub fn new(index: u32, is_last: bool) -> Self {
        Self { index, is_last }
    }

    /// Returns the 0-based attempt index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub fn number(self) -> u32 {
        self.index.saturating_add(1)
    }

    /// Returns `true` for the first attempt.
    #[must_use]
    pub fn is_first(self) -> bool {
        self.index == 0
    }

    /// Returns `true` if no further attempt follows this one.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.is_last
    }

    pub(crate) fn first(max_attempts: u32) -> Self {
        Self::new(0, max_attempts <= 1)
    }

    pub(crate) fn next(self, max_attempts: u32) -> Option<Self> {
        let next = self.index.saturating_add(1);
        if next >= max_attempts {
            return None;
        }

        Some(Self::new(next, next == max_attempts.saturating_sub(1)))
    }
}

impl Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Every attempt failed, or an error was classified as not retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryExhausted<E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub error: E,
}

impl<E> RetryExhausted<E> {
    /// Returns the error of the last attempt.
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: Display> Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation failed after {} attempt(s): {}", self.attempts, self.error)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retries a fallible async operation with linear backoff.
///
/// `Retry` is a reusable policy: configure it once and call [`execute`][Self::execute]
/// for each operation. See the [module documentation][self] for the schedule.
pub struct Retry<E> {
    clock: Clock,
    max_attempts: u32,
    delay: Duration,
    should_retry: Option<Predicate<E>>,
    telemetry: Telemetry,
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            max_attempts: self.max_attempts,
            delay: self.delay,
            should_retry: self.should_retry.clone(),
            telemetry: self.telemetry.clone(),
        }
    }
}

impl<E> Debug for Retry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("retry_if", &self.should_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> Retry<E> {
    /// Creates a retry policy with [`DEFAULT_MAX_ATTEMPTS`] and [`DEFAULT_DELAY`].
    #[must_use]
    pub fn new(context: &Context) -> Self {
        Self::with_telemetry(context.clock().clone(), context.telemetry(COMPONENT, Cow::Borrowed(COMPONENT)))
    }

    pub(crate) fn with_telemetry(clock: Clock, telemetry: Telemetry) -> Self {
        Self {
            clock,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            should_retry: None,
            telemetry,
        }
    }

    /// Sets the instance name attached to log events and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.telemetry.instance_name = name.into();
        self
    }

    /// Sets the total number of attempts, including the first. Zero is treated as one.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the base delay. The wait after attempt `n` is `delay * n`.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Retries only errors for which `predicate` returns `true`.
    ///
    /// A rejected error ends the loop immediately and is returned as [`RetryExhausted`]
    /// with the attempts made so far.
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Returns the wait that follows a failed `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: Attempt) -> Duration {
        self.delay.saturating_mul(attempt.number())
    }

    /// Runs `operation` until it succeeds or the attempts are used up.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] with the last error when no attempt succeeded.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = Attempt::first(self.max_attempts);

        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let retryable = self.should_retry.as_ref().is_none_or(|predicate| predicate(&error));
            let next = if retryable { attempt.next(self.max_attempts) } else { None };

            let Some(next) = next else {
                return Err(RetryExhausted {
                    attempts: attempt.number(),
                    error,
                });
            };

            let delay = self.delay_after(attempt);
            self.emit_retry(attempt, delay);
            self.clock.delay(delay).await;
            attempt = next;
        }
    }

    fn emit_retry(&self, attempt: Attempt, delay: Duration) {
        if self.telemetry.logs_enabled {
            tracing::event!(
                name: "rampart.retry",
                tracing::Level::WARN,
                pipeline.name = %self.telemetry.pipeline_name,
                retry.name = %self.telemetry.instance_name,
                retry.attempt = attempt.number(),
                retry.max_attempts = self.max_attempts,
                retry.delay = delay.as_secs_f32(),
            );
        }

        self.telemetry.report("retry");
    }
}

/// Runs `operation` with `max_attempts` attempts and a linear `delay` on `clock`.
///
/// Shorthand for [`Retry::execute`] with a policy built from the arguments. Retries are
/// logged under the default pipeline name and report no metrics; build a [`Retry`] from a
/// [`Context`] for either.
///
/// # Errors
///
/// Returns [`RetryExhausted`] with the last error when no attempt succeeded.
pub async fn retry<T, E, F, Fut>(clock: &Clock, max_attempts: u32, delay: Duration, operation: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry::with_telemetry(clock.clone(), Telemetry::detached(COMPONENT, Cow::Borrowed(COMPONENT)))
        .max_attempts(max_attempts)
        .delay(delay)
        .execute(operation)
        .await
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rstest::rstest;
    use static_assertions::assert_impl_all;
    use tracing_test::traced_test;

    use super::*;
    use crate::ClockControl;

    fn retry(control: &ClockControl) -> Retry<String> {
        Retry::new(&Context::new(control.to_clock())).delay(Duration::from_secs(1))
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Retry<String>: Send, Sync, Clone);
        assert_impl_all!(RetryExhausted<std::io::Error>: std::error::Error);
    }

    #[test]
    fn attempt_progression() {
        let first = Attempt::first(3);
        assert!(first.is_first());
        assert!(!first.is_last());

        let second = first.next(3).unwrap();
        let third = second.next(3).unwrap();
        assert_eq!(third.number(), 3);
        assert!(third.is_last());
        assert!(third.next(3).is_none());

        assert!(Attempt::first(1).is_last());
        assert_eq!(Attempt::default(), Attempt::first(1));
        assert_eq!(third.to_string(), "3");
    }

    #[tokio::test]
    async fn success_invokes_once() {
        let control = ClockControl::new();
        let calls = AtomicU32::new(0);

        let value = retry(&control)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>("done") }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(control.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let control = ClockControl::new();
        let calls = AtomicU32::new(0);

        let error = retry(&control)
            .max_attempts(3)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(format!("failure {}", attempt.number())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.attempts, 3);
        assert_eq!(error.error, "failure 3");
        assert_eq!(error.to_string(), "operation failed after 3 attempt(s): failure 3");
        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(control.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn recovers_on_later_attempt() {
        let control = ClockControl::new();

        let value = retry(&control)
            .max_attempts(5)
            .execute(|attempt| async move {
                if attempt.index() < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt.number())
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(control.elapsed(), Duration::from_secs(3));
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(4, 4)]
    #[tokio::test]
    async fn attempts_made(#[case] max_attempts: u32, #[case] expected: u32) {
        let control = ClockControl::new();
        let calls = AtomicU32::new(0);

        let error = retry(&control)
            .max_attempts(max_attempts)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("boom".to_string()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), expected);
        assert_eq!(error.attempts, expected);
    }

    #[tokio::test]
    async fn retry_if_stops_on_rejected_error() {
        let control = ClockControl::new();
        let calls = AtomicU32::new(0);

        let error = retry(&control)
            .max_attempts(5)
            .retry_if(|error: &String| error.starts_with("transient"))
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt.is_first() {
                        Err::<(), _>("transient timeout".to_string())
                    } else {
                        Err("invalid input".to_string())
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(error.attempts, 2);
        assert_eq!(error.into_inner(), "invalid input");
        assert_eq!(control.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn delay_schedule_is_linear() {
        let control = ClockControl::new();
        let retry = retry(&control).delay(Duration::from_millis(250));

        let delays: Vec<_> = (0..3).map(|i| retry.delay_after(Attempt::new(i, false))).collect();
        assert_eq!(
            delays,
            [Duration::from_millis(250), Duration::from_millis(500), Duration::from_millis(750)]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn retries_are_logged() {
        let control = ClockControl::new();

        let _ = retry(&control)
            .name("ocr")
            .max_attempts(2)
            .execute(|_| async { Err::<(), _>("boom".to_string()) })
            .await;

        assert!(logs_contain("rampart::retry"));
        assert!(logs_contain("retry.name=ocr"));
        assert!(logs_contain("retry.attempt=1"));
        assert!(logs_contain("retry.max_attempts=2"));
        assert!(!logs_contain("retry.attempt=2"));
    }

    #[tokio::test]
    async fn free_function() {
        let control = ClockControl::new();
        let clock = control.to_clock();

        let result = super::retry(&clock, 2, Duration::from_millis(10), |attempt| async move {
            if attempt.is_last() { Ok(()) } else { Err("once") }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(control.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn free_function_policy_has_no_meter() {
        let retry = Retry::<String>::with_telemetry(
            ClockControl::new().to_clock(),
            Telemetry::detached(COMPONENT, Cow::Borrowed(COMPONENT)),
        );

        assert!(retry.telemetry.events.is_none());
        assert_eq!(retry.telemetry.pipeline_name, "default");
    }

    #[test]
    fn debug_output() {
        let retry = retry(&ClockControl::new()).retry_if(|_| true);
        let debug = format!("{retry:?}");

        assert!(debug.contains("max_attempts: 3"));
        assert!(debug.contains("retry_if: true"));
    }
}
