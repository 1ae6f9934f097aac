use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure at the system boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad input or missing prerequisite.
    Validation,
    /// Input exceeds a configured size limit.
    Budget,
    /// Transient or remote failure of the completion service.
    Upstream,
    /// An internal deadline was exceeded.
    Timeout,
    /// The caller withdrew the request.
    Cancelled,
    /// Unexpected failure.
    Internal,
    /// Admission wait-timeout exhausted (queueing pressure, not call latency).
    Busy,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Budget => "budget",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
            ErrorKind::Busy => "busy",
        }
    }
}

/// Provided and allowed sizes attached to `budget` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimit {
    pub provided: u64,
    pub allowed: u64,
}

/// The only shape errors take when they leave the runner.
///
/// `code` is stable and machine readable (`E_NO_DIFF`, `E_BUSY`, ...); `retryable` hints
/// whether re-invoking the same tool later may succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    pub code: String,
    pub message: String,
    pub kind: ErrorKind,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<SizeLimit>,
}

impl ErrorDescriptor {
    /// Builds a descriptor with the default retry hint for `kind`.
    pub fn new(code: impl Into<String>, message: impl Into<String>, kind: ErrorKind) -> Self {
        let retryable = matches!(
            kind,
            ErrorKind::Upstream | ErrorKind::Timeout | ErrorKind::Busy
        );
        Self {
            code: code.into(),
            message: message.into(),
            kind,
            retryable,
            limit: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_limit(mut self, provided: u64, allowed: u64) -> Self {
        self.limit = Some(SizeLimit { provided, allowed });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_hint_follows_kind() {
        assert!(ErrorDescriptor::new("E_UPSTREAM", "x", ErrorKind::Upstream).retryable);
        assert!(ErrorDescriptor::new("E_BUSY", "x", ErrorKind::Busy).retryable);
        assert!(!ErrorDescriptor::new("E_NO_DIFF", "x", ErrorKind::Validation).retryable);
        assert!(!ErrorDescriptor::new("E_CANCELLED", "x", ErrorKind::Cancelled).retryable);
    }

    #[test]
    fn budget_descriptor_carries_sizes() {
        let err = ErrorDescriptor::new("E_BUDGET_EXCEEDED", "too large", ErrorKind::Budget)
            .with_limit(900, 500);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "budget");
        assert_eq!(json["limit"]["provided"], 900);
        assert_eq!(json["limit"]["allowed"], 500);
        assert_eq!(err.to_string(), "E_BUDGET_EXCEEDED: too large");
    }
}
