use lens_model::{ErrorDescriptor, ErrorKind, TaskId};
use thiserror::Error;

use crate::upstream::BatchState;

/// Failure of a single generation request as seen by the dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("request cancelled")]
    Cancelled,

    #[error("no {pool} slot became free within {waited_ms} ms")]
    Busy { pool: &'static str, waited_ms: u64 },

    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("output truncated by the {limit}-token output limit")]
    Truncated { limit: u32 },

    #[error("upstream response has no content")]
    NoContent,

    #[error("malformed structured output: {0}")]
    Malformed(String),

    #[error("batch submission returned no job handle")]
    BatchSubmit,

    #[error("batch job {state}: {detail}")]
    BatchFailed { state: BatchState, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    /// Shorthand for an upstream failure that only carries a message.
    pub fn upstream(message: impl Into<String>) -> Self {
        GenerationError::Upstream {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Timeout { .. } => ErrorKind::Timeout,
            GenerationError::Cancelled => ErrorKind::Cancelled,
            GenerationError::Busy { .. } => ErrorKind::Busy,
            GenerationError::Upstream { .. }
            | GenerationError::Truncated { .. }
            | GenerationError::NoContent
            | GenerationError::Malformed(_)
            | GenerationError::BatchSubmit
            | GenerationError::BatchFailed { .. } => ErrorKind::Upstream,
            GenerationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Output that could not be read as the expected structured payload.
    ///
    /// These failures are repaired by re-prompting, never retried unchanged.
    pub fn is_schema_class(&self) -> bool {
        matches!(
            self,
            GenerationError::NoContent | GenerationError::Malformed(_)
        )
    }

    /// Stable machine readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::Timeout { .. } => "E_TIMEOUT",
            GenerationError::Cancelled => "E_CANCELLED",
            GenerationError::Busy { .. } => "E_BUSY",
            GenerationError::Truncated { .. } => "E_TRUNCATED",
            GenerationError::NoContent | GenerationError::Malformed(_) => "E_SCHEMA_INVALID",
            GenerationError::Upstream { .. }
            | GenerationError::BatchSubmit
            | GenerationError::BatchFailed { .. } => "E_UPSTREAM",
            GenerationError::Internal(_) => "E_INTERNAL",
        }
    }

    pub fn to_descriptor(&self) -> ErrorDescriptor {
        let descriptor = ErrorDescriptor::new(self.code(), self.to_string(), self.kind());
        match self {
            // Same prompt, same limit: re-invoking cannot help.
            GenerationError::Truncated { .. } => descriptor.with_retryable(false),
            _ => descriptor,
        }
    }
}

impl From<GenerationError> for ErrorDescriptor {
    fn from(err: GenerationError) -> Self {
        err.to_descriptor()
    }
}

/// Task store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {0} already holds a terminal result")]
    AlreadyTerminal(TaskId),

    #[error("status {status} can only be set together with a result")]
    TerminalWithoutResult { status: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_codes() {
        assert_eq!(GenerationError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            GenerationError::Busy { pool: "interactive", waited_ms: 10 }.kind(),
            ErrorKind::Busy
        );
        assert_eq!(
            GenerationError::Timeout { timeout_ms: 5 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(GenerationError::NoContent.code(), "E_SCHEMA_INVALID");
        assert_eq!(GenerationError::upstream("boom").code(), "E_UPSTREAM");
    }

    #[test]
    fn schema_class_is_only_content_failures() {
        assert!(GenerationError::NoContent.is_schema_class());
        assert!(GenerationError::Malformed("eof".into()).is_schema_class());
        assert!(!GenerationError::Truncated { limit: 10 }.is_schema_class());
        assert!(!GenerationError::upstream("x").is_schema_class());
    }

    #[test]
    fn truncation_descriptor_is_not_retryable() {
        let d = GenerationError::Truncated { limit: 8192 }.to_descriptor();
        assert_eq!(d.code, "E_TRUNCATED");
        assert!(!d.retryable);
        assert!(d.message.contains("8192"));

        let d = GenerationError::Busy { pool: "batch", waited_ms: 100 }.to_descriptor();
        assert_eq!(d.kind, ErrorKind::Busy);
        assert!(d.retryable);
    }
}
