// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::SystemTime;

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
pub enum Severity {
    /// Informational, no action needed.
    Info,
    /// Something degraded but the system is still serving.
    Warning,
    /// A failure that affects requests.
    Error,
    /// A failure that needs immediate attention.
    Critical,
}

impl Severity {
    /// Returns the lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The area of the system an alert concerns. Handlers subscribe per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
pub enum Category {
    /// Authentication and abuse.
    Security,
    /// Latency and error rates.
    Performance,
    /// Dependency and service health.
    Availability,
    /// Payments and invoicing.
    Billing,
    /// Rate limits and plan quotas.
    Quota,
    /// Host resources and internals.
    System,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Security,
        Self::Performance,
        Self::Availability,
        Self::Billing,
        Self::Quota,
        Self::System,
    ];

    /// Returns the lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Availability => "availability",
            Self::Billing => "billing",
            Self::Quota => "quota",
            Self::System => "system",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier assigned to an alert when it is triggered.
///
/// Identifiers increase monotonically per sink and stay valid after older alerts are
/// evicted, which makes them the handle for [`AlertSink::resolve_alert`][super::AlertSink::resolve_alert].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize))]
pub struct AlertId(pub(crate) u64);

impl AlertId {
    /// Returns the numeric value of the identifier.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Free-form key/value context attached to an alert.
pub type Details = BTreeMap<String, String>;

/// A recorded threshold breach.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize))]
pub struct Alert {
    pub(crate) id: AlertId,
    pub(crate) severity: Severity,
    pub(crate) category: Category,
    pub(crate) message: String,
    pub(crate) details: Details,
    pub(crate) timestamp: SystemTime,
    pub(crate) resolved: bool,
}

impl Alert {
    /// Returns the identifier assigned when the alert was triggered.
    #[must_use]
    pub fn id(&self) -> AlertId {
        self.id
    }

    /// Returns the severity.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the category.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the attached details.
    #[must_use]
    pub fn details(&self) -> &Details {
        &self.details
    }

    /// Returns when the alert was triggered.
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Returns `true` once the alert has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}
