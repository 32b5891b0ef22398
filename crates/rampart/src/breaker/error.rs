// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt::Display;
use std::time::Duration;

/// The breaker rejected a call without invoking the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker '{name}' is open, retry after {}ms", .retry_after.as_millis())]
#[non_exhaustive]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call.
    pub name: Cow<'static, str>,
    /// Time until the breaker admits a trial call. Zero while a trial is in flight.
    pub retry_after: Duration,
}

/// Error returned by [`CircuitBreaker::execute`][super::CircuitBreaker::execute].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// The breaker is open and the operation was not invoked.
    Open(CircuitOpenError),
    /// The operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was rejected by the breaker.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Returns the operation's error, or `None` if the call was rejected.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(error) => Some(error),
            Self::Open(_) => None,
        }
    }
}

impl<E: Display> Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(error) => Display::fmt(error, f),
            Self::Inner(error) => Display::fmt(error, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(_) => None,
            Self::Inner(error) => Some(error),
        }
    }
}

impl<E> From<CircuitOpenError> for BreakerError<E> {
    fn from(error: CircuitOpenError) -> Self {
        Self::Open(error)
    }
}
