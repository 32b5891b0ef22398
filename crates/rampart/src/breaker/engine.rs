// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use super::CircuitState;

/// How an admitted call is treated when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Enter {
    Admitted(Mode),
    Rejected { retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Exit {
    Unchanged,
    Opened { failure_count: u32 },
    Reopened,
    Closed,
}

/// Snapshot of a breaker returned by [`CircuitBreaker::stats`][super::CircuitBreaker::stats].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct BreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Failures recorded since the breaker last closed.
    pub failure_count: u32,
    /// Calls rejected without invoking the operation.
    pub rejected: u64,
    /// Number of transitions into the open state, including re-opens after a failed trial.
    pub trips: u64,
    /// When the most recent failure was recorded.
    pub last_failure: Option<Instant>,
}

/// The breaker state machine. Callers serialize access through a mutex.
#[derive(Debug)]
pub(super) struct Engine {
    pub(super) failure_threshold: u32,
    pub(super) reset_timeout: Duration,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    rejected: u64,
    trips: u64,
}

impl Engine {
    pub(super) fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            trial_in_flight: false,
            rejected: 0,
            trips: 0,
        }
    }

    pub(super) fn state(&self) -> CircuitState {
        self.state
    }

    pub(super) fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub(super) fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state,
            failure_count: self.failure_count,
            rejected: self.rejected,
            trips: self.trips,
            last_failure: self.last_failure,
        }
    }

    pub(super) fn enter(&mut self, now: Instant) -> Enter {
        match self.state {
            CircuitState::Closed => Enter::Admitted(Mode::Normal),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map_or(self.reset_timeout, |at| now.saturating_duration_since(at));

                if elapsed >= self.reset_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Enter::Admitted(Mode::Trial)
                } else {
                    self.rejected += 1;
                    Enter::Rejected {
                        retry_after: self.reset_timeout.saturating_sub(elapsed),
                    }
                }
            }
            CircuitState::HalfOpen if self.trial_in_flight => {
                self.rejected += 1;
                Enter::Rejected {
                    retry_after: Duration::ZERO,
                }
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                Enter::Admitted(Mode::Trial)
            }
        }
    }

    pub(super) fn exit(&mut self, mode: Mode, outcome: Outcome, now: Instant) -> Exit {
        match (mode, outcome) {
            (Mode::Trial, Outcome::Success) => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.trial_in_flight = false;
                Exit::Closed
            }
            (Mode::Trial, Outcome::Failure) => {
                self.record_failure(now);
                self.state = CircuitState::Open;
                self.trial_in_flight = false;
                self.trips += 1;
                Exit::Reopened
            }
            // a success while closed leaves the failure count untouched
            (Mode::Normal, Outcome::Success) => Exit::Unchanged,
            (Mode::Normal, Outcome::Failure) => {
                self.record_failure(now);

                if self.state == CircuitState::Closed && self.failure_count >= self.failure_threshold {
                    self.state = CircuitState::Open;
                    self.trips += 1;
                    Exit::Opened {
                        failure_count: self.failure_count,
                    }
                } else {
                    Exit::Unchanged
                }
            }
        }
    }

    /// Releases the trial slot of a call that never completed.
    pub(super) fn abandon(&mut self, mode: Mode) {
        if mode == Mode::Trial && self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    pub(super) fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
        self.trial_in_flight = false;
    }

    fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn tripped(now: Instant) -> Engine {
        let mut engine = Engine::new(2, TIMEOUT);
        engine.exit(Mode::Normal, Outcome::Failure, now);
        assert_eq!(
            engine.exit(Mode::Normal, Outcome::Failure, now),
            Exit::Opened { failure_count: 2 }
        );
        engine
    }

    #[test]
    fn closed_admits_and_counts_failures() {
        let now = Instant::now();
        let mut engine = Engine::new(3, TIMEOUT);

        assert_eq!(engine.enter(now), Enter::Admitted(Mode::Normal));
        assert_eq!(engine.exit(Mode::Normal, Outcome::Failure, now), Exit::Unchanged);
        assert_eq!(engine.exit(Mode::Normal, Outcome::Success, now), Exit::Unchanged);
        assert_eq!(engine.failure_count(), 1);
        assert_eq!(engine.state(), CircuitState::Closed);
    }

    #[test]
    fn open_rejects_until_timeout() {
        let now = Instant::now();
        let mut engine = tripped(now);

        assert_eq!(
            engine.enter(now + Duration::from_secs(15)),
            Enter::Rejected {
                retry_after: Duration::from_secs(45)
            }
        );
        assert_eq!(engine.stats().rejected, 1);

        assert_eq!(engine.enter(now + TIMEOUT), Enter::Admitted(Mode::Trial));
        assert_eq!(engine.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_admits_single_trial() {
        let now = Instant::now();
        let mut engine = tripped(now);
        let later = now + TIMEOUT;

        assert_eq!(engine.enter(later), Enter::Admitted(Mode::Trial));
        assert_eq!(
            engine.enter(later),
            Enter::Rejected {
                retry_after: Duration::ZERO
            }
        );
    }

    #[test]
    fn trial_success_closes() {
        let now = Instant::now();
        let mut engine = tripped(now);
        let later = now + TIMEOUT;

        engine.enter(later);
        assert_eq!(engine.exit(Mode::Trial, Outcome::Success, later), Exit::Closed);
        assert_eq!(engine.state(), CircuitState::Closed);
        assert_eq!(engine.failure_count(), 0);
    }

    #[test]
    fn trial_failure_reopens_and_restarts_timeout() {
        let now = Instant::now();
        let mut engine = tripped(now);
        let later = now + TIMEOUT;

        engine.enter(later);
        assert_eq!(engine.exit(Mode::Trial, Outcome::Failure, later), Exit::Reopened);
        assert_eq!(engine.state(), CircuitState::Open);
        assert_eq!(engine.failure_count(), 3);
        assert_eq!(engine.stats().trips, 2);
        assert!(matches!(engine.enter(later + Duration::from_secs(1)), Enter::Rejected { .. }));
    }

    #[test]
    fn abandoned_trial_frees_slot() {
        let now = Instant::now();
        let mut engine = tripped(now);
        let later = now + TIMEOUT;

        engine.enter(later);
        engine.abandon(Mode::Trial);

        assert_eq!(engine.state(), CircuitState::HalfOpen);
        assert_eq!(engine.enter(later), Enter::Admitted(Mode::Trial));
    }

    #[test]
    fn late_failure_while_open_stays_open() {
        let now = Instant::now();
        let mut engine = tripped(now);

        assert_eq!(engine.exit(Mode::Normal, Outcome::Failure, now), Exit::Unchanged);
        assert_eq!(engine.state(), CircuitState::Open);
        assert_eq!(engine.stats().trips, 1);
    }

    #[test]
    fn reset_closes() {
        let now = Instant::now();
        let mut engine = tripped(now);

        engine.reset();

        assert_eq!(engine.state(), CircuitState::Closed);
        assert_eq!(engine.failure_count(), 0);
        assert_eq!(engine.stats().last_failure, None);
        assert_eq!(engine.enter(now), Enter::Admitted(Mode::Normal));
    }
}
