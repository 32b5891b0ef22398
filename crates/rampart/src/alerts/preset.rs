// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use super::{Alert, AlertSink, Category, Details, Severity};

/// Predefined alert kinds with a fixed category, default severity and message shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Preset {
    /// A caller was denied by the rate limiter.
    RateLimitExceeded,
    /// A tenant used up a plan quota.
    QuotaExceeded,
    /// Repeated authentication failures for one identity.
    AuthFailure,
    /// The error rate of a service crossed its threshold.
    HighErrorRate,
    /// A response took longer than its threshold.
    SlowResponse,
    /// A payment could not be processed.
    PaymentFailure,
    /// An external dependency stopped answering, e.g. a circuit breaker opened.
    DependencyUnavailable,
    /// The database could not be reached.
    DatabaseUnavailable,
    /// Process memory usage crossed its threshold.
    HighMemoryUsage,
}

impl Preset {
    /// Returns the default severity and the category of the preset.
    #[must_use]
    pub fn classification(self) -> (Severity, Category) {
        match self {
            Self::RateLimitExceeded | Self::QuotaExceeded => (Severity::Warning, Category::Quota),
            Self::AuthFailure => (Severity::Warning, Category::Security),
            Self::HighErrorRate => (Severity::Error, Category::Performance),
            Self::SlowResponse => (Severity::Warning, Category::Performance),
            Self::PaymentFailure => (Severity::Error, Category::Billing),
            Self::DependencyUnavailable | Self::DatabaseUnavailable => (Severity::Critical, Category::Availability),
            Self::HighMemoryUsage => (Severity::Warning, Category::System),
        }
    }
}

fn details<const N: usize>(pairs: [(&str, String); N]) -> Details {
    pairs.into_iter().map(|(key, value)| (key.to_string(), value)).collect()
}

/// Convenience triggers for the predefined alert kinds.
impl AlertSink {
    fn trigger_preset(&self, preset: Preset, message: String, details: Details) -> Alert {
        let (severity, category) = preset.classification();
        self.trigger(severity, category, message, details)
    }

    /// Records that `key` was denied by the rate limiter.
    pub fn rate_limit_exceeded(&self, key: &str, max_requests: u64, window: Duration) -> Alert {
        self.trigger_preset(
            Preset::RateLimitExceeded,
            format!("rate limit exceeded for {key}"),
            details([
                ("key", key.to_string()),
                ("max_requests", max_requests.to_string()),
                ("window_ms", window.as_millis().to_string()),
            ]),
        )
    }

    /// Records that `subject` used up its `resource` quota.
    pub fn quota_exceeded(&self, subject: &str, resource: &str, used: u64, limit: u64) -> Alert {
        self.trigger_preset(
            Preset::QuotaExceeded,
            format!("{resource} quota exceeded for {subject}: {used}/{limit}"),
            details([
                ("subject", subject.to_string()),
                ("resource", resource.to_string()),
                ("used", used.to_string()),
                ("limit", limit.to_string()),
            ]),
        )
    }

    /// Records failed authentication attempts for `identity`.
    ///
    /// The alert escalates to [`Severity::Critical`] once `attempts` exceeds the sink's
    /// auth failure threshold.
    pub fn auth_failure(&self, identity: &str, attempts: u32) -> Alert {
        let (severity, category) = Preset::AuthFailure.classification();
        let severity = if attempts > self.auth_failure_threshold {
            Severity::Critical
        } else {
            severity
        };

        self.trigger(
            severity,
            category,
            format!("{attempts} failed authentication attempts for {identity}"),
            details([("identity", identity.to_string()), ("attempts", attempts.to_string())]),
        )
    }

    /// Records that the error rate of `service` crossed `threshold` (both as fractions).
    pub fn high_error_rate(&self, service: &str, rate: f64, threshold: f64) -> Alert {
        self.trigger_preset(
            Preset::HighErrorRate,
            format!("error rate of {service} is {:.1}% (threshold {:.1}%)", rate * 100.0, threshold * 100.0),
            details([
                ("service", service.to_string()),
                ("rate", rate.to_string()),
                ("threshold", threshold.to_string()),
            ]),
        )
    }

    /// Records that a response from `endpoint` took longer than `threshold`.
    pub fn slow_response(&self, endpoint: &str, elapsed: Duration, threshold: Duration) -> Alert {
        self.trigger_preset(
            Preset::SlowResponse,
            format!("slow response from {endpoint}: {}ms", elapsed.as_millis()),
            details([
                ("endpoint", endpoint.to_string()),
                ("elapsed_ms", elapsed.as_millis().to_string()),
                ("threshold_ms", threshold.as_millis().to_string()),
            ]),
        )
    }

    /// Records a failed payment.
    pub fn payment_failure(&self, customer: &str, reason: &str) -> Alert {
        self.trigger_preset(
            Preset::PaymentFailure,
            format!("payment failed for {customer}: {reason}"),
            details([("customer", customer.to_string()), ("reason", reason.to_string())]),
        )
    }

    /// Records that an external dependency is unavailable.
    pub fn dependency_unavailable(&self, dependency: &str, reason: &str) -> Alert {
        self.trigger_preset(
            Preset::DependencyUnavailable,
            format!("dependency {dependency} unavailable: {reason}"),
            details([("dependency", dependency.to_string()), ("reason", reason.to_string())]),
        )
    }

    /// Records that the database cannot be reached.
    pub fn database_unavailable(&self, reason: &str) -> Alert {
        self.trigger_preset(
            Preset::DatabaseUnavailable,
            format!("database unavailable: {reason}"),
            details([("reason", reason.to_string())]),
        )
    }

    /// Records memory usage above the threshold, both given as percentages.
    pub fn high_memory_usage(&self, percent: f64, threshold: f64) -> Alert {
        self.trigger_preset(
            Preset::HighMemoryUsage,
            format!("memory usage at {percent:.1}% (threshold {threshold:.1}%)"),
            details([("percent", percent.to_string()), ("threshold", threshold.to_string())]),
        )
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{Clock, Context};

    fn sink() -> AlertSink {
        AlertSink::new(&Context::new(Clock::new_frozen()))
    }

    #[rstest]
    #[case(Preset::RateLimitExceeded, Category::Quota)]
    #[case(Preset::QuotaExceeded, Category::Quota)]
    #[case(Preset::AuthFailure, Category::Security)]
    #[case(Preset::HighErrorRate, Category::Performance)]
    #[case(Preset::SlowResponse, Category::Performance)]
    #[case(Preset::PaymentFailure, Category::Billing)]
    #[case(Preset::DependencyUnavailable, Category::Availability)]
    #[case(Preset::DatabaseUnavailable, Category::Availability)]
    #[case(Preset::HighMemoryUsage, Category::System)]
    fn preset_categories(#[case] preset: Preset, #[case] category: Category) {
        assert_eq!(preset.classification().1, category);
    }

    #[test]
    fn auth_failure_escalates_above_threshold() {
        let sink = sink().auth_failure_threshold(3);

        assert_eq!(sink.auth_failure("u1", 2).severity(), Severity::Warning);
        assert_eq!(sink.auth_failure("u1", 3).severity(), Severity::Warning);
        assert_eq!(sink.auth_failure("u1", 4).severity(), Severity::Critical);
        assert_eq!(sink.auth_failure("u1", 10).severity(), Severity::Critical);
    }

    #[test]
    fn rate_limit_exceeded_shape() {
        let alert = sink().rate_limit_exceeded("u1:/convert", 5, Duration::from_secs(1));

        assert_eq!(alert.category(), Category::Quota);
        assert_eq!(alert.severity(), Severity::Warning);
        assert_eq!(alert.message(), "rate limit exceeded for u1:/convert");
        assert_eq!(alert.details()["max_requests"], "5");
        assert_eq!(alert.details()["window_ms"], "1000");
    }

    #[test]
    fn formatted_messages() {
        let sink = sink();

        assert_eq!(
            sink.high_error_rate("converter", 0.25, 0.1).message(),
            "error rate of converter is 25.0% (threshold 10.0%)"
        );
        assert_eq!(
            sink.slow_response("/convert", Duration::from_millis(2_500), Duration::from_secs(1))
                .message(),
            "slow response from /convert: 2500ms"
        );
        assert_eq!(
            sink.quota_exceeded("t1", "conversions", 101, 100).message(),
            "conversions quota exceeded for t1: 101/100"
        );
        assert_eq!(sink.database_unavailable("timeout").severity(), Severity::Critical);
        assert_eq!(sink.payment_failure("c1", "card declined").category(), Category::Billing);
        assert_eq!(sink.high_memory_usage(91.0, 90.0).category(), Category::System);
        assert_eq!(
            sink.dependency_unavailable("ocr", "circuit open").message(),
            "dependency ocr unavailable: circuit open"
        );
    }
}
