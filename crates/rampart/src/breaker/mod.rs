// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-dependency circuit breaker.
//!
//! A [`CircuitBreaker`] guards calls to one unreliable dependency and stops calling it
//! once it keeps failing:
//!
//! - **Closed**: calls pass through. Every failure increments the failure count and when
//!   it reaches `failure_threshold` the breaker opens. Successes do not reset the count.
//! - **Open**: calls are rejected with [`CircuitOpenError`] without invoking the
//!   operation. The first call made `reset_timeout` or later after the last failure moves
//!   the breaker to half-open. There is no background timer.
//! - **Half-open**: a single trial call is admitted; concurrent calls are rejected until
//!   it completes. A successful trial closes the breaker and clears the count, a failed
//!   trial re-opens it and restarts the timeout. A trial whose future is dropped frees the
//!   slot for the next caller.
//!
//! The state lives behind a mutex, so one breaker can be shared by concurrent tasks
//! (wrap it in an [`Arc`]). The lock is never held while the operation runs.
//!
//! | Option | Default |
//! |--------|---------|
//! | `failure_threshold` | [`DEFAULT_FAILURE_THRESHOLD`] (5) |
//! | `reset_timeout` | [`DEFAULT_RESET_TIMEOUT`] (60 seconds) |
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use rampart::breaker::{BreakerError, CircuitBreaker, CircuitState};
//! use rampart::{ClockControl, Context};
//!
//! # futures::executor::block_on(async {
//! let control = ClockControl::new();
//! let breaker = CircuitBreaker::new("ocr_service", &Context::new(control.to_clock()))
//!     .failure_threshold(1)
//!     .reset_timeout(Duration::from_secs(30));
//!
//! let failed = breaker.execute(|| async { Err::<(), _>("timeout") }).await;
//! assert!(matches!(failed, Err(BreakerError::Inner("timeout"))));
//! assert_eq!(breaker.state(), CircuitState::Open);
//!
//! let rejected = breaker.execute(|| async { Ok::<_, &str>(()) }).await;
//! assert!(rejected.unwrap_err().is_open());
//!
//! control.advance(Duration::from_secs(30));
//! breaker.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # });
//! ```

mod engine;
mod error;

use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

pub use engine::BreakerStats;
use engine::{Engine, Enter, Exit, Mode, Outcome};
pub use error::{BreakerError, CircuitOpenError};
use parking_lot::Mutex;

use crate::alerts::AlertSink;
use crate::telemetry::Telemetry;
use crate::{Clock, Context};

/// Failures that open a closed breaker when none is configured.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time an open breaker waits before admitting a trial call when none is configured.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

const COMPONENT: &str = "breaker";

/// The state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// A single trial call decides between closed and open.
    HalfOpen,
}

impl CircuitState {
    /// Returns the name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOptions {
    /// Failures that open a closed breaker. Zero is treated as one.
    pub failure_threshold: u32,
    /// Time after the last failure before an open breaker admits a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Guards calls to one dependency. See the [module documentation][self].
pub struct CircuitBreaker<E> {
    name: Cow<'static, str>,
    clock: Clock,
    engine: Mutex<Engine>,
    failure_if: Option<Classifier<E>>,
    alerts: Option<Arc<AlertSink>>,
    telemetry: Telemetry,
}

impl<E> Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("engine", &*self.engine.lock())
            .field("alerts", &self.alerts.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> CircuitBreaker<E> {
    /// Creates a closed breaker with the default options.
    ///
    /// `name` identifies the protected dependency in errors, logs and alerts.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, context: &Context) -> Self {
        let name = name.into();
        let options = BreakerOptions::default();

        Self {
            clock: context.clock().clone(),
            engine: Mutex::new(Engine::new(options.failure_threshold, options.reset_timeout)),
            failure_if: None,
            alerts: None,
            telemetry: context.telemetry(COMPONENT, name.clone()),
            name,
        }
    }

    /// Applies both thresholds at once.
    #[must_use]
    pub fn options(self, options: BreakerOptions) -> Self {
        self.failure_threshold(options.failure_threshold)
            .reset_timeout(options.reset_timeout)
    }

    /// Sets the number of failures that opens a closed breaker. Zero is treated as one.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.engine.get_mut().failure_threshold = threshold.max(1);
        self
    }

    /// Sets how long an open breaker waits after the last failure before a trial call.
    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.engine.get_mut().reset_timeout = timeout;
        self
    }

    /// Counts only errors for which `classifier` returns `true` as failures.
    ///
    /// Other errors are still returned to the caller as [`BreakerError::Inner`] but are
    /// treated as a successful call, e.g. a validation error from a healthy dependency.
    #[must_use]
    pub fn failure_if(mut self, classifier: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.failure_if = Some(Arc::new(classifier));
        self
    }

    /// Triggers a dependency-unavailable alert on `sink` whenever the breaker opens.
    #[must_use]
    pub fn alerts(mut self, sink: Arc<AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    ///
    /// An open breaker reports [`CircuitState::Open`] until a call moves it to half-open,
    /// even when the reset timeout already elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.engine.lock().state()
    }

    /// Returns the failures recorded since the breaker last closed.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.engine.lock().failure_count()
    }

    /// Returns a snapshot of the breaker.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        self.engine.lock().stats()
    }

    /// Forces the breaker closed and clears the failure count.
    pub fn reset(&self) {
        self.engine.lock().reset();
    }

    /// Runs `operation` unless the breaker is open.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without invoking `operation` when the breaker
    /// rejects the call, and [`BreakerError::Inner`] with the original error when the
    /// operation fails.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mode = self.enter()?;
        let call = PendingCall { breaker: self, mode };

        let result = operation().await;

        let outcome = match &result {
            Err(error) if self.failure_if.as_ref().is_none_or(|classify| classify(error)) => Outcome::Failure,
            _ => Outcome::Success,
        };
        call.complete(outcome);

        result.map_err(BreakerError::Inner)
    }

    fn enter(&self) -> Result<Mode, CircuitOpenError> {
        let entered = self.engine.lock().enter(self.clock.instant());

        match entered {
            Enter::Admitted(mode) => Ok(mode),
            Enter::Rejected { retry_after } => {
                if self.telemetry.logs_enabled {
                    tracing::event!(
                        name: "rampart.breaker.rejected",
                        tracing::Level::WARN,
                        pipeline.name = %self.telemetry.pipeline_name,
                        breaker.name = %self.name,
                        breaker.retry_after = retry_after.as_secs_f32(),
                    );
                }
                self.telemetry.report("rejected");

                Err(CircuitOpenError {
                    name: self.name.clone(),
                    retry_after,
                })
            }
        }
    }

    fn exit(&self, mode: Mode, outcome: Outcome) {
        let now = self.clock.instant();
        let (exit, reset_timeout) = {
            let mut engine = self.engine.lock();
            (engine.exit(mode, outcome, now), engine.reset_timeout)
        };

        match exit {
            Exit::Opened { failure_count } => {
                self.emit_opened(failure_count, reset_timeout, false);

                if let Some(sink) = &self.alerts {
                    sink.dependency_unavailable(
                        &self.name,
                        &format!("circuit opened after {failure_count} failures"),
                    );
                }
            }
            Exit::Reopened => {
                let failure_count = self.failure_count();
                self.emit_opened(failure_count, reset_timeout, true);
            }
            Exit::Closed => {
                if self.telemetry.logs_enabled {
                    tracing::event!(
                        name: "rampart.breaker.closed",
                        tracing::Level::INFO,
                        pipeline.name = %self.telemetry.pipeline_name,
                        breaker.name = %self.name,
                        breaker.state = %CircuitState::Closed,
                    );
                }
                self.telemetry.report("closed");
            }
            Exit::Unchanged => {}
        }
    }

    fn emit_opened(&self, failure_count: u32, reset_timeout: Duration, reopened: bool) {
        if self.telemetry.logs_enabled {
            tracing::event!(
                name: "rampart.breaker.opened",
                tracing::Level::WARN,
                pipeline.name = %self.telemetry.pipeline_name,
                breaker.name = %self.name,
                breaker.state = %CircuitState::Open,
                breaker.failure_count = failure_count,
                breaker.reset_timeout = reset_timeout.as_secs_f32(),
                breaker.reopened = reopened,
            );
        }
        self.telemetry.report("opened");
    }
}

/// An admitted call. Dropping it before completion releases a half-open trial slot.
struct PendingCall<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    mode: Mode,
}

impl<E> PendingCall<'_, E> {
    fn complete(self, outcome: Outcome) {
        let this = std::mem::ManuallyDrop::new(self);
        this.breaker.exit(this.mode, outcome);
    }
}

impl<E> Drop for PendingCall<'_, E> {
    fn drop(&mut self) {
        self.breaker.engine.lock().abandon(self.mode);
    }
}
