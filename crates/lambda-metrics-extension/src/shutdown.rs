//! Shutdown condition taxonomy.
//!
//! Components return a structured [`ShutdownCondition`] instead of an
//! opaque error. The runtime loop is the only place that decides whether
//! a condition is reported to the control plane and when the process
//! terminates.

use std::fmt;

/// Why the extension is terminating.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Control plane unreachable or returned a malformed response.
    Api,
    /// Invariant violation or panic inside the control loop.
    Internal,
    /// Metrics flush failed under the fail-fast policy.
    Metric,
    /// Normal termination requested by the host, carrying the
    /// host-supplied reason string (e.g. `spindown`, `timeout`).
    Host(String),
}

/// A terminal condition that ends the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownCondition {
    reason: ShutdownReason,
    message: String,
}

impl ShutdownCondition {
    /// A fatal control-plane protocol or transport failure.
    pub fn api(message: impl Into<String>) -> Self {
        Self {
            reason: ShutdownReason::Api,
            message: message.into(),
        }
    }

    /// An unexpected internal failure, reported as such regardless of
    /// the root cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            reason: ShutdownReason::Internal,
            message: message.into(),
        }
    }

    /// A metrics delivery failure that is terminal under fail-fast.
    pub fn metric(message: impl Into<String>) -> Self {
        Self {
            reason: ShutdownReason::Metric,
            message: message.into(),
        }
    }

    /// A host-initiated shutdown. Not an error.
    pub fn host(reason: impl Into<String>) -> Self {
        Self {
            reason: ShutdownReason::Host(reason.into()),
            message: String::new(),
        }
    }

    /// The structured reason.
    pub fn reason(&self) -> &ShutdownReason {
        &self.reason
    }

    /// Human-readable detail, empty for host-initiated shutdowns.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this condition must be reported to the control plane
    /// before exiting.
    pub fn is_error(&self) -> bool {
        !matches!(self.reason, ShutdownReason::Host(_))
    }

    /// Short label used as the error type on control-plane reports and
    /// as the shutdown-cause metric dimension.
    pub fn reason_label(&self) -> &str {
        match &self.reason {
            ShutdownReason::Api => "api",
            ShutdownReason::Internal => "internal",
            ShutdownReason::Metric => "metric",
            ShutdownReason::Host(reason) => reason,
        }
    }
}

impl fmt::Display for ShutdownCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.reason_label())
        } else {
            write!(f, "{}: {}", self.reason_label(), self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conditions() {
        assert!(ShutdownCondition::api("no response").is_error());
        assert!(ShutdownCondition::internal("panic").is_error());
        assert!(ShutdownCondition::metric("flush failed").is_error());
        assert!(!ShutdownCondition::host("spindown").is_error());
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(ShutdownCondition::api("x").reason_label(), "api");
        assert_eq!(ShutdownCondition::internal("x").reason_label(), "internal");
        assert_eq!(ShutdownCondition::metric("x").reason_label(), "metric");
        assert_eq!(ShutdownCondition::host("timeout").reason_label(), "timeout");
    }

    #[test]
    fn test_display() {
        let condition = ShutdownCondition::metric("failed to send metrics");
        assert_eq!(format!("{}", condition), "metric: failed to send metrics");

        let condition = ShutdownCondition::host("spindown");
        assert_eq!(format!("{}", condition), "spindown");
    }
}
