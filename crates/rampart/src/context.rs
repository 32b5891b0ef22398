// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use crate::Clock;
use crate::telemetry::Telemetry;

pub(crate) const DEFAULT_PIPELINE_NAME: &str = "default";

/// Shared dependencies for the components of a traffic-control pipeline.
///
/// `Context` bundles the [`Clock`] every component reads time from, a logical pipeline
/// name attached to log events and metrics, and the telemetry switches. Construct one
/// context per process (or per protected subsystem) and pass it to each component
/// constructor; components never reach for global state.
///
/// When the `metrics` feature is enabled, the context also carries an OpenTelemetry
/// counter created from the global meter provider, or from the provider passed to
/// [`meter_provider`][Self::meter_provider].
///
/// # Examples
///
/// ```
/// use rampart::{Clock, Context};
///
/// let context = Context::new(Clock::system()).name("conversion_api");
/// assert_eq!(context.pipeline_name(), "conversion_api");
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    clock: Clock,
    pipeline_name: Cow<'static, str>,
    logs_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    events: Option<opentelemetry::metrics::Counter<u64>>,
}

impl Context {
    /// Creates a context with the given clock, the default pipeline name and logging enabled.
    pub fn new(clock: impl AsRef<Clock>) -> Self {
        Self {
            clock: clock.as_ref().clone(),
            pipeline_name: Cow::Borrowed(DEFAULT_PIPELINE_NAME),
            logs_enabled: true,
            #[cfg(any(feature = "metrics", test))]
            events: Some(crate::telemetry::create_event_counter(
                &crate::telemetry::create_meter(opentelemetry::global::meter_provider().as_ref()),
            )),
        }
    }

    /// Sets the logical pipeline name that groups components in logs and metrics.
    ///
    /// Prefer `snake_case`, e.g. `billing_api`.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.pipeline_name = name.into();
        self
    }

    /// Enables or disables the diagnostic log events emitted by components.
    ///
    /// Alerts are always logged by the [`AlertSink`][crate::alerts::AlertSink] regardless of
    /// this switch because logging is part of the alert contract.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs_enabled = enabled;
        self
    }

    /// Overrides the meter provider used to create the event counter.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn meter_provider(mut self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        self.events = Some(crate::telemetry::create_event_counter(&crate::telemetry::create_meter(provider)));
        self
    }

    /// Returns the clock shared by the pipeline.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub(crate) fn telemetry(&self, component: &'static str, instance_name: Cow<'static, str>) -> Telemetry {
        Telemetry {
            pipeline_name: self.pipeline_name.clone(),
            component,
            instance_name,
            logs_enabled: self.logs_enabled,
            #[cfg(any(feature = "metrics", test))]
            events: self.events.clone(),
        }
    }
}

impl AsRef<Clock> for Context {
    fn as_ref(&self) -> &Clock {
        &self.clock
    }
}
