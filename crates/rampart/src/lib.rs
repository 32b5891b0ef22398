// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Traffic control and resilience primitives for multi-tenant services.
//!
//! This crate protects a service from overload, cascading failure and noisy neighbors
//! with a handful of small, cooperating components:
//!
//! - [`rate_limit`]: a sliding-window rate limiter whose counts live in a shared
//!   ordered-set store, so every service instance enforces the same budget.
//! - [`breaker`]: a per-dependency circuit breaker that fails fast once a dependency
//!   keeps failing and probes it again after a timeout.
//! - [`retry`]: bounded retries with linear backoff.
//! - [`cache`]: an in-process TTL cache with a background sweep.
//! - [`alerts`]: an in-process alert log with severity/category classification and
//!   per-category handlers.
//!
//! The crate decides nothing about *what* to limit or which plan maps to which budget;
//! callers derive keys and limits and map decisions and errors to their transport
//! (for HTTP: denial to 429, open circuit to 503).
//!
//! # Context and time
//!
//! Every component is constructed from a [`Context`], which carries the [`Clock`], a
//! pipeline name used in logs and metrics, and telemetry switches. Nothing in this crate
//! reads global state or the system clock directly; tests substitute a controlled clock
//! through [`ClockControl`] and move time forward explicitly.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rampart::alerts::AlertSink;
//! use rampart::breaker::CircuitBreaker;
//! use rampart::rate_limit::{MemoryWindowStore, RateLimit, RateLimiter};
//! use rampart::retry::Retry;
//! use rampart::{Clock, Context};
//!
//! # futures::executor::block_on(async {
//! let context = Context::new(Clock::new_frozen()).name("conversion_api");
//! let alerts = Arc::new(AlertSink::new(&context));
//!
//! let limiter = RateLimiter::new(MemoryWindowStore::new(&context), &context).alerts(Arc::clone(&alerts));
//! let breaker = CircuitBreaker::new("ocr_service", &context).alerts(Arc::clone(&alerts));
//! let retry = Retry::new(&context).max_attempts(2).delay(Duration::from_millis(50));
//!
//! let decision = limiter.is_allowed("u1:/convert", RateLimit::per_minute(60)).await.unwrap();
//! assert!(decision.allowed);
//!
//! let pages = breaker
//!     .execute(|| retry.execute(|_| async { Ok::<_, &str>(3) }))
//!     .await
//!     .unwrap();
//! assert_eq!(pages, 3);
//! # });
//! ```
//!
//! # Features
//!
//! - `serde`: the `config` module with deserializable settings for every component, and
//!   `Serialize` implementations for alerts.
//! - `metrics`: an OpenTelemetry counter named `rampart.event`, see [`telemetry`].
//!
//! # Logging
//!
//! Components emit structured [`tracing`] events named `rampart.<component>.<event>`,
//! e.g. `rampart.breaker.opened`. Diagnostic events can be switched off with
//! [`Context::logs`]; alerts are always logged.

pub mod alerts;
pub mod breaker;
pub mod cache;
mod clock;
#[cfg(any(feature = "serde", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub mod config;
mod context;
pub mod rate_limit;
pub mod retry;
pub mod telemetry;

pub use clock::{Clock, ClockControl};
pub use context::Context;
