// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{AdmitOutcome, AdmitRequest, StoreError, WindowStore};
use crate::Clock;

#[derive(Debug, Default)]
struct Window {
    members: HashMap<String, u64>,
    expires_at: Option<Instant>,
}

/// An in-process [`WindowStore`].
///
/// All sets live behind a single lock, which makes [`admit`][WindowStore::admit] atomic.
/// Counts are only shared by limiters using the same store instance, so this store suits
/// single-instance deployments and tests. Expired sets are dropped when they are next
/// touched or by [`cleanup`][Self::cleanup].
#[derive(Debug)]
pub struct MemoryWindowStore {
    clock: Clock,
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryWindowStore {
    /// Creates an empty store that evaluates set expiry on `clock`.
    pub fn new(clock: impl AsRef<Clock>) -> Self {
        Self {
            clock: clock.as_ref().clone(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of sets, including expired sets not yet removed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    /// Returns `true` if the store holds no sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    /// Removes every expired set and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.instant();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| !window.is_expired(now));
        before - windows.len()
    }

    fn with_window<R>(&self, key: &str, f: impl FnOnce(Option<&mut Window>) -> R) -> R {
        let now = self.clock.instant();
        let mut windows = self.windows.lock();

        if windows.get(key).is_some_and(|window| window.is_expired(now)) {
            windows.remove(key);
        }

        let result = f(windows.get_mut(key));

        if windows.get(key).is_some_and(|window| window.members.is_empty()) {
            windows.remove(key);
        }

        result
    }
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn remove_by_score(&mut self, min: u64, max: u64) -> u64 {
        let before = self.members.len();
        self.members.retain(|_, score| !(min..=max).contains(score));
        (before - self.members.len()) as u64
    }
}

impl WindowStore for MemoryWindowStore {
    async fn remove_by_score(&self, key: &str, min: u64, max: u64) -> Result<u64, StoreError> {
        Ok(self.with_window(key, |window| window.map_or(0, |w| w.remove_by_score(min, max))))
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.with_window(key, |window| window.map_or(0, |w| w.members.len() as u64)))
    }

    async fn add(&self, key: &str, member: &str, score: u64) -> Result<(), StoreError> {
        let now = self.clock.instant();
        let mut windows = self.windows.lock();

        let window = windows.entry(key.to_string()).or_default();
        if window.is_expired(now) {
            *window = Window::default();
        }
        window.members.insert(member.to_string(), score);

        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.instant().checked_add(ttl);
        self.with_window(key, |window| {
            if let Some(window) = window {
                window.expires_at = expires_at;
            }
        });

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.windows.lock().remove(key);
        Ok(())
    }

    async fn admit(&self, request: &AdmitRequest<'_>) -> Result<AdmitOutcome, StoreError> {
        let now = self.clock.instant();
        let mut windows = self.windows.lock();

        let window = windows.entry(request.key.to_string()).or_default();
        if window.is_expired(now) {
            *window = Window::default();
        }

        if let Some(max) = request.window_start.checked_sub(1) {
            window.remove_by_score(0, max);
        }

        let count = window.members.len() as u64;
        let admitted = count < request.max_requests;

        if admitted {
            window.members.insert(request.member.to_string(), request.now);
            window.expires_at = now.checked_add(request.ttl);
        } else if window.members.is_empty() {
            windows.remove(request.key);
        }

        Ok(AdmitOutcome { admitted, count })
    }
}
