//! Seam to the remote structured-generation service.
//!
//! Implementations perform plain network calls; timeouts and cancellation are applied by the
//! executors, which drop the in-flight future when either fires.
use std::fmt;

use async_trait::async_trait;
use lens_model::UsageMetadata;

use crate::{GenerationError, GenerationRequest};

#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// One synchronous completion call.
    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, GenerationError>;

    /// Submits an asynchronous job; `None` means the service accepted the call but returned no handle.
    async fn create_batch(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<BatchHandle>, GenerationError>;

    /// Fetches the current remote state of a job.
    async fn get_batch(&self, handle: &BatchHandle) -> Result<BatchStatus, GenerationError>;

    /// Asks the service to cancel a job.
    async fn cancel_batch(&self, handle: &BatchHandle) -> Result<(), GenerationError>;
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinishReason {
    #[default]
    Unspecified,
    Stop,
    /// Output hit the configured output-size limit.
    MaxTokens,
    Safety,
    Other,
}

/// Result of one completion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: Option<String>,
    pub usage: Option<UsageMetadata>,
    pub finish_reason: FinishReason,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            usage: None,
            finish_reason: FinishReason::Stop,
        }
    }
}

/// Opaque remote job name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchHandle {
    pub name: String,
}

impl BatchHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Remote job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Running => "running",
            BatchState::Succeeded => "succeeded",
            BatchState::Failed => "failed",
            BatchState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatus {
    pub state: BatchState,
    /// Response text, present once the job succeeded.
    pub body: Option<String>,
    /// Remote error detail for failed or cancelled jobs.
    pub error: Option<String>,
    /// The job finished but its answer hit the output token limit.
    pub truncated: bool,
}

impl BatchStatus {
    pub fn running() -> Self {
        Self {
            state: BatchState::Running,
            body: None,
            error: None,
            truncated: false,
        }
    }

    pub fn succeeded(body: impl Into<String>) -> Self {
        Self {
            state: BatchState::Succeeded,
            body: Some(body.into()),
            error: None,
            truncated: false,
        }
    }

    /// Finished job whose answer was cut off at the output token limit.
    pub fn truncated() -> Self {
        Self {
            state: BatchState::Succeeded,
            body: None,
            error: None,
            truncated: true,
        }
    }

    pub fn failed(state: BatchState, error: Option<String>) -> Self {
        Self {
            state,
            body: None,
            error,
            truncated: false,
        }
    }
}
