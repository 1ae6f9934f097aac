use lens_core::GenerationError;
use lens_model::{ErrorDescriptor, ErrorKind};
use thiserror::Error;

use crate::context::ContextKind;

/// Failure of one tool invocation, before normalization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no {0} is cached; provide one before invoking this tool")]
    MissingContext(ContextKind),

    #[error("cached {kind} is {provided} bytes, limit is {allowed} bytes")]
    Budget {
        kind: ContextKind,
        provided: u64,
        allowed: u64,
    },

    #[error("response does not match the output schema: {0}")]
    SchemaInvalid(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) | ToolError::InvalidInput(_) => "E_INVALID_INPUT",
            ToolError::MissingContext(kind) => kind.missing_code(),
            ToolError::Budget { .. } => "E_BUDGET_EXCEEDED",
            ToolError::SchemaInvalid(_) => "E_SCHEMA_INVALID",
            ToolError::Generation(e) => e.code(),
            ToolError::Internal(_) => "E_INTERNAL",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_)
            | ToolError::InvalidInput(_)
            | ToolError::MissingContext(_) => ErrorKind::Validation,
            ToolError::Budget { .. } => ErrorKind::Budget,
            ToolError::SchemaInvalid(_) => ErrorKind::Upstream,
            ToolError::Generation(e) => e.kind(),
            ToolError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Normalized shape handed to callers.
    pub fn to_descriptor(&self) -> ErrorDescriptor {
        match self {
            ToolError::Generation(e) => e.to_descriptor(),
            ToolError::Budget {
                provided, allowed, ..
            } => ErrorDescriptor::new(self.code(), self.to_string(), self.kind())
                .with_limit(*provided, *allowed),
            _ => ErrorDescriptor::new(self.code(), self.to_string(), self.kind()),
        }
    }
}

impl From<ToolError> for ErrorDescriptor {
    fn from(err: ToolError) -> Self {
        err.to_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_model::SizeLimit;

    #[test]
    fn missing_context_is_validation() {
        let d = ToolError::MissingContext(ContextKind::Diff).to_descriptor();
        assert_eq!(d.code, "E_NO_DIFF");
        assert_eq!(d.kind, ErrorKind::Validation);
        assert!(!d.retryable);
    }

    #[test]
    fn budget_carries_sizes() {
        let d = ToolError::Budget {
            kind: ContextKind::File,
            provided: 900,
            allowed: 500,
        }
        .to_descriptor();
        assert_eq!(d.code, "E_BUDGET_EXCEEDED");
        assert_eq!(d.kind, ErrorKind::Budget);
        assert_eq!(
            d.limit,
            Some(SizeLimit {
                provided: 900,
                allowed: 500
            })
        );
    }

    #[test]
    fn generation_errors_keep_their_classification() {
        let d = ToolError::from(GenerationError::Timeout { timeout_ms: 10 }).to_descriptor();
        assert_eq!(d.code, "E_TIMEOUT");
        assert_eq!(d.kind, ErrorKind::Timeout);

        let d = ToolError::SchemaInvalid("missing summary".into()).to_descriptor();
        assert_eq!(d.code, "E_SCHEMA_INVALID");
        assert!(d.retryable);
    }
}
