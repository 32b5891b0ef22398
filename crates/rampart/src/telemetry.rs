// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry attribute names and the metric instruments shared by all components.
//!
//! With the `metrics` feature enabled every component reports to a single counter,
//! `rampart.event`, tagged with the attributes below.

use std::borrow::Cow;

/// Attribute carrying the pipeline name configured on the [`Context`][crate::Context].
pub const PIPELINE_NAME: &str = "rampart.pipeline.name";

/// Attribute carrying the component kind (`rate_limiter`, `breaker`, `retry`, `alerts`, `cache`).
pub const COMPONENT: &str = "rampart.component";

/// Attribute carrying the name of the component instance.
pub const INSTANCE_NAME: &str = "rampart.instance.name";

/// Attribute carrying the event name.
pub const EVENT_NAME: &str = "rampart.event.name";

#[cfg(any(feature = "metrics", test))]
const METER_NAME: &str = "rampart";
#[cfg(any(feature = "metrics", test))]
const VERSION: &str = "v0.1.0";
#[cfg(any(feature = "metrics", test))]
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

#[cfg(any(feature = "metrics", test))]
pub(crate) fn create_meter(meter_provider: &dyn opentelemetry::metrics::MeterProvider) -> opentelemetry::metrics::Meter {
    meter_provider.meter_with_scope(
        opentelemetry::InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

#[cfg(any(feature = "metrics", test))]
pub(crate) fn create_event_counter(meter: &opentelemetry::metrics::Meter) -> opentelemetry::metrics::Counter<u64> {
    meter
        .u64_counter("rampart.event")
        .with_description("Emitted upon the occurrence of a traffic-control event.")
        .with_unit("u64")
        .build()
}

/// Per-component telemetry handle derived from a [`Context`][crate::Context].
#[derive(Debug, Clone)]
pub(crate) struct Telemetry {
    pub(crate) pipeline_name: Cow<'static, str>,
    pub(crate) component: &'static str,
    pub(crate) instance_name: Cow<'static, str>,
    pub(crate) logs_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) events: Option<opentelemetry::metrics::Counter<u64>>,
}

impl Telemetry {
    /// Telemetry outside any [`Context`][crate::Context]: default pipeline name, logs on, no metrics.
    pub(crate) fn detached(component: &'static str, instance_name: Cow<'static, str>) -> Self {
        Self {
            pipeline_name: Cow::Borrowed(crate::context::DEFAULT_PIPELINE_NAME),
            component,
            instance_name,
            logs_enabled: true,
            #[cfg(any(feature = "metrics", test))]
            events: None,
        }
    }

    #[cfg_attr(
        not(any(feature = "metrics", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when metrics feature not used")
    )]
    pub(crate) fn report(&self, event: &'static str) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(events) = &self.events {
            events.add(
                1,
                &[
                    opentelemetry::KeyValue::new(PIPELINE_NAME, self.pipeline_name.clone()),
                    opentelemetry::KeyValue::new(COMPONENT, self.component),
                    opentelemetry::KeyValue::new(INSTANCE_NAME, self.instance_name.clone()),
                    opentelemetry::KeyValue::new(EVENT_NAME, event),
                ],
            );
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    use super::*;
    use crate::{Clock, Context};

    #[test]
    #[cfg(not(miri))]
    fn assert_definitions() {
        let exporter = InMemoryMetricExporter::default();
        let meter_provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();

        let meter = create_meter(&meter_provider);
        let events = create_event_counter(&meter);
        events.add(1, &[]);

        meter_provider.force_flush().unwrap();

        let metrics = exporter.get_finished_metrics().unwrap();
        let str = format!("{metrics:?}");

        assert!(str.contains("rampart.event"));
        assert!(str.contains("u64"));
        assert!(str.contains("rampart"));
        assert!(str.contains("v0.1.0"));
        assert!(str.contains("https://opentelemetry.io/schemas/1.47"));
    }

    #[test]
    #[cfg(not(miri))]
    fn report_tags_event_with_component_attributes() {
        let exporter = InMemoryMetricExporter::default();
        let meter_provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();

        let context = Context::new(Clock::new_frozen())
            .name("checkout")
            .meter_provider(&meter_provider);
        let telemetry = context.telemetry("breaker", Cow::Borrowed("payments"));
        telemetry.report("opened");

        meter_provider.force_flush().unwrap();

        let str = format!("{:?}", exporter.get_finished_metrics().unwrap());
        assert!(str.contains("checkout"));
        assert!(str.contains("payments"));
        assert!(str.contains("opened"));
        assert!(str.contains(COMPONENT));
    }

    #[test]
    fn detached_has_no_meter() {
        let telemetry = Telemetry::detached("retry", Cow::Borrowed("retry"));

        assert!(telemetry.events.is_none());
        assert!(telemetry.logs_enabled);
        assert_eq!(telemetry.pipeline_name, crate::context::DEFAULT_PIPELINE_NAME);
        telemetry.report("retry");
    }
}
