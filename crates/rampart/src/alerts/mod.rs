// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process alert bus with severity and category classification.
//!
//! [`AlertSink`] records threshold breaches raised by any component (quota exceeded,
//! breaker opened, high error rate, ...). Each [`trigger`][AlertSink::trigger]:
//!
//! 1. appends an [`Alert`] to a bounded log (oldest alerts are dropped on overflow),
//! 2. emits a `rampart.alert` log event at a level matching the severity, and
//! 3. synchronously invokes every handler registered for the alert's category.
//!
//! A handler that panics is caught and logged as a [`HandlerError`]; it never stops the
//! remaining handlers and never fails the trigger. Handlers run on the triggering task,
//! so slow handlers slow down the caller; dispatch to a channel inside the handler when
//! that matters.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use rampart::alerts::{AlertSink, Category, Details, Severity};
//! use rampart::{Clock, Context};
//!
//! let sink = AlertSink::new(&Context::new(Clock::system()));
//!
//! let pages = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&pages);
//! sink.on_alert(Category::Availability, move |alert| {
//!     if alert.severity() >= Severity::Critical {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }
//! });
//!
//! let alert = sink.dependency_unavailable("ocr_service", "circuit open");
//! assert_eq!(pages.load(Ordering::Relaxed), 1);
//!
//! assert!(sink.resolve_alert(alert.id()));
//! assert!(sink.unresolved_alerts(None).is_empty());
//! # let _ = (Details::new(), Category::Quota);
//! ```

mod alert;
mod preset;

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub use alert::{Alert, AlertId, Category, Details, Severity};
use parking_lot::{Mutex, RwLock};
pub use preset::Preset;

use crate::telemetry::Telemetry;
use crate::{Clock, Context};

/// Number of alerts retained when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Attempt count at which [`AlertSink::auth_failure`] escalates to [`Severity::Critical`].
pub const DEFAULT_AUTH_FAILURE_THRESHOLD: u32 = 5;

const COMPONENT: &str = "alerts";

type Handler = Arc<dyn Fn(&Alert) + Send + Sync>;

/// An alert handler panicked while processing an alert.
///
/// The error is logged by the sink and never returned to the caller of
/// [`AlertSink::trigger`].
#[derive(Debug, thiserror::Error)]
#[error("alert handler for {category} alert {alert_id} panicked: {message}")]
#[non_exhaustive]
pub struct HandlerError {
    /// Identifier of the alert being handled.
    pub alert_id: AlertId,
    /// Category the handler was registered for.
    pub category: Category,
    /// Panic payload rendered as text.
    pub message: String,
}

impl HandlerError {
    fn from_panic(alert: &Alert, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        Self {
            alert_id: alert.id,
            category: alert.category,
            message,
        }
    }
}

/// Alert counts reported by [`AlertSink::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct AlertStats {
    /// Alerts currently retained.
    pub total: usize,
    /// Retained alerts not yet resolved.
    pub unresolved: usize,
    /// Retained alerts with [`Severity::Info`].
    pub info: usize,
    /// Retained alerts with [`Severity::Warning`].
    pub warning: usize,
    /// Retained alerts with [`Severity::Error`].
    pub error: usize,
    /// Retained alerts with [`Severity::Critical`].
    pub critical: usize,
}

#[derive(Debug, Default)]
struct Log {
    alerts: VecDeque<Alert>,
    next_id: u64,
}

#[derive(Default)]
struct Handlers {
    by_category: HashMap<Category, Vec<Handler>>,
    any: Vec<Handler>,
}

/// A bounded, in-process alert log with per-category handlers.
///
/// Create one sink per process, wrap it in an [`Arc`], and hand it to the components that
/// should report breaches. See the [module documentation][self] for details.
pub struct AlertSink {
    clock: Clock,
    capacity: usize,
    pub(crate) auth_failure_threshold: u32,
    log: Mutex<Log>,
    handlers: RwLock<Handlers>,
    telemetry: Telemetry,
}

impl Debug for AlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("AlertSink")
            .field("capacity", &self.capacity)
            .field("auth_failure_threshold", &self.auth_failure_threshold)
            .field("alerts", &self.log.lock().alerts.len())
            .field(
                "handlers",
                &(handlers.by_category.values().map(Vec::len).sum::<usize>() + handlers.any.len()),
            )
            .finish_non_exhaustive()
    }
}

impl AlertSink {
    /// Creates a sink retaining [`DEFAULT_CAPACITY`] alerts.
    #[must_use]
    pub fn new(context: &Context) -> Self {
        Self {
            clock: context.clock().clone(),
            capacity: DEFAULT_CAPACITY,
            auth_failure_threshold: DEFAULT_AUTH_FAILURE_THRESHOLD,
            log: Mutex::new(Log::default()),
            handlers: RwLock::new(Handlers::default()),
            telemetry: context.telemetry(COMPONENT, Cow::Borrowed("alert_sink")),
        }
    }

    /// Sets how many alerts are retained. A capacity of zero is treated as one.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Sets the attempt count above which [`auth_failure`][Self::auth_failure] escalates to critical.
    #[must_use]
    pub fn auth_failure_threshold(mut self, attempts: u32) -> Self {
        self.auth_failure_threshold = attempts;
        self
    }

    /// Registers a handler invoked for every alert of `category`.
    pub fn on_alert(&self, category: Category, handler: impl Fn(&Alert) + Send + Sync + 'static) {
        self.handlers
            .write()
            .by_category
            .entry(category)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Registers a handler invoked for every alert regardless of category.
    pub fn on_any_alert(&self, handler: impl Fn(&Alert) + Send + Sync + 'static) {
        self.handlers.write().any.push(Arc::new(handler));
    }

    /// Records an alert, logs it and notifies the handlers registered for its category.
    ///
    /// Returns a copy of the recorded alert.
    pub fn trigger(&self, severity: Severity, category: Category, message: impl Into<String>, details: Details) -> Alert {
        let timestamp = self.clock.system_time();

        let alert = {
            let mut log = self.log.lock();
            let alert = Alert {
                id: AlertId(log.next_id),
                severity,
                category,
                message: message.into(),
                details,
                timestamp,
                resolved: false,
            };
            log.next_id = log.next_id.saturating_add(1);
            log.alerts.push_back(alert.clone());
            while log.alerts.len() > self.capacity {
                log.alerts.pop_front();
            }
            alert
        };

        self.log_alert(&alert);
        self.telemetry.report(severity.as_str());
        self.notify(&alert);

        alert
    }

    /// Returns up to `limit` retained alerts, most recent first, optionally filtered by category.
    #[must_use]
    pub fn recent_alerts(&self, limit: usize, category: Option<Category>) -> Vec<Alert> {
        self.log
            .lock()
            .alerts
            .iter()
            .rev()
            .filter(|alert| category.is_none_or(|c| alert.category == c))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns every retained alert that is not resolved, most recent first.
    #[must_use]
    pub fn unresolved_alerts(&self, category: Option<Category>) -> Vec<Alert> {
        self.log
            .lock()
            .alerts
            .iter()
            .rev()
            .filter(|alert| !alert.resolved && category.is_none_or(|c| alert.category == c))
            .cloned()
            .collect()
    }

    /// Marks the alert with the given identifier as resolved.
    ///
    /// Returns `false` if the alert is no longer retained. Resolution is permanent.
    pub fn resolve_alert(&self, id: AlertId) -> bool {
        let mut log = self.log.lock();
        match log.alerts.binary_search_by_key(&id, |alert| alert.id) {
            Ok(index) => {
                log.alerts[index].resolved = true;
                true
            }
            Err(_) => false,
        }
    }

    /// Removes every retained alert. Identifiers keep increasing afterwards.
    pub fn clear_alerts(&self) {
        self.log.lock().alerts.clear();
    }

    /// Returns the number of retained alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().alerts.len()
    }

    /// Returns `true` if no alert is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().alerts.is_empty()
    }

    /// Returns alert counts over the retained log.
    #[must_use]
    pub fn stats(&self) -> AlertStats {
        let log = self.log.lock();
        let mut stats = AlertStats {
            total: log.alerts.len(),
            ..AlertStats::default()
        };

        for alert in &log.alerts {
            if !alert.resolved {
                stats.unresolved += 1;
            }
            match alert.severity {
                Severity::Info => stats.info += 1,
                Severity::Warning => stats.warning += 1,
                Severity::Error => stats.error += 1,
                Severity::Critical => stats.critical += 1,
            }
        }

        stats
    }

    fn notify(&self, alert: &Alert) {
        // Handlers run without holding the lock so they may register further handlers or trigger alerts.
        let handlers: Vec<Handler> = {
            let handlers = self.handlers.read();
            handlers
                .by_category
                .get(&alert.category)
                .into_iter()
                .flatten()
                .chain(handlers.any.iter())
                .cloned()
                .collect()
        };

        for handler in handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(alert))) {
                let error = HandlerError::from_panic(alert, payload.as_ref());
                tracing::event!(
                    name: "rampart.alert.handler_failed",
                    tracing::Level::ERROR,
                    pipeline.name = %self.telemetry.pipeline_name,
                    alert.id = alert.id.0,
                    alert.category = alert.category.as_str(),
                    error = %error,
                );
                self.telemetry.report("handler_failed");
            }
        }
    }

    fn log_alert(&self, alert: &Alert) {
        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    name: "rampart.alert",
                    $level,
                    pipeline.name = %self.telemetry.pipeline_name,
                    alert.id = alert.id.0,
                    alert.severity = alert.severity.as_str(),
                    alert.category = alert.category.as_str(),
                    alert.details = ?alert.details,
                    "{}",
                    alert.message,
                )
            };
        }

        match alert.severity {
            Severity::Info => emit!(tracing::Level::INFO),
            Severity::Warning => emit!(tracing::Level::WARN),
            Severity::Error | Severity::Critical => emit!(tracing::Level::ERROR),
        }
    }
}
