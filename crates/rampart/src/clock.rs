// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time abstraction shared by every component in this crate.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Provides an abstraction for time-related operations.
///
/// Every component that needs the current time or has to wait receives a `Clock`
/// instead of calling [`Instant::now`], [`SystemTime::now`] or `tokio::time::sleep`
/// directly. In production the clock reads the operating system clocks and waits on
/// the Tokio timer. In tests the clock is driven by a [`ClockControl`] so that expiry,
/// window slides and backoff delays can be exercised without real waiting.
///
/// The clock offers two representations of time:
///
/// - [`instant`][Self::instant]: monotonic time, used for relative measurements such
///   as cache expiry and circuit breaker timeouts.
/// - [`system_time`][Self::system_time] and [`unix_millis`][Self::unix_millis]: absolute
///   wall-clock time, used where a point in time crosses process boundaries (rate limiter
///   scores shared through an external store) or is reported to callers.
///
/// # Cloning and shared state
///
/// Cloning a clock is inexpensive and every clone observes the same time. When the clock
/// is controlled, advancing the [`ClockControl`] is visible through every clone.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rampart::{Clock, ClockControl};
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let start = clock.instant();
/// control.advance(Duration::from_secs(5));
///
/// assert_eq!(clock.instant() - start, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    System,
    Controlled(ClockControl),
}

impl Clock {
    /// Creates a clock backed by the operating system clocks and the Tokio timer.
    #[must_use]
    pub fn system() -> Self {
        Self { source: Source::System }
    }

    /// Creates a controlled clock that only moves when a delay elapses through it.
    ///
    /// The clock starts at the UNIX epoch. Use [`ClockControl`] directly when the test also
    /// needs to move time forward manually.
    #[must_use]
    pub fn new_frozen() -> Self {
        ClockControl::new().to_clock()
    }

    /// Returns the current monotonic instant.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.source {
            Source::System => Instant::now(),
            Source::Controlled(control) => control.instant(),
        }
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        match &self.source {
            Source::System => SystemTime::now(),
            Source::Controlled(control) => control.system_time(),
        }
    }

    /// Returns the number of whole milliseconds elapsed since the UNIX epoch.
    ///
    /// A wall clock set before the epoch reports zero.
    #[must_use]
    pub fn unix_millis(&self) -> u64 {
        to_unix_millis(self.system_time())
    }

    /// Waits until `duration` has elapsed.
    ///
    /// On a controlled clock the wait completes immediately and moves the controlled time
    /// forward by `duration`, so code under test observes exactly the time it asked for.
    pub async fn delay(&self, duration: Duration) {
        match &self.source {
            Source::System => tokio::time::sleep(duration).await,
            Source::Controlled(control) => control.advance(duration),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl AsRef<Self> for Clock {
    fn as_ref(&self) -> &Self {
        self
    }
}

/// Controls the flow of time in tests.
///
/// The controlled time starts at the UNIX epoch (or at the time passed to
/// [`ClockControl::at`]) and only moves when [`advance`][Self::advance] is called or
/// when code waits through [`Clock::delay`].
///
/// # Examples
///
/// ```
/// use std::time::{Duration, UNIX_EPOCH};
///
/// use rampart::ClockControl;
///
/// let control = ClockControl::at(UNIX_EPOCH + Duration::from_secs(1_000));
/// let clock = control.to_clock();
/// assert_eq!(clock.unix_millis(), 1_000_000);
///
/// control.advance(Duration::from_millis(250));
/// assert_eq!(clock.unix_millis(), 1_000_250);
/// ```
#[derive(Debug, Clone)]
pub struct ClockControl {
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    origin_instant: Instant,
    origin_time: SystemTime,
    elapsed: Duration,
}

impl ClockControl {
    /// Creates a clock control positioned at the UNIX epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::at(UNIX_EPOCH)
    }

    /// Creates a clock control positioned at the given wall-clock time.
    #[must_use]
    pub fn at(time: SystemTime) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                origin_instant: Instant::now(),
                origin_time: time,
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Creates a [`Clock`] driven by this control.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock {
            source: Source::Controlled(self.clone()),
        }
    }

    /// Moves the controlled time forward.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.elapsed = state.elapsed.saturating_add(duration);
    }

    /// Moves the controlled time forward by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Returns the total time this control has been advanced by.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    fn instant(&self) -> Instant {
        let state = self.state.lock();
        state.origin_instant + state.elapsed
    }

    fn system_time(&self) -> SystemTime {
        let state = self.state.lock();
        state.origin_time + state.elapsed
    }
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn to_unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}
