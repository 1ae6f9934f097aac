use lens_model::{ExecutionMode, GenerationParams, Prompt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One structured-generation request.
///
/// Immutable once built; a schema repair builds a new request via [`GenerationRequest::with_prompt`].
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    origin: String,
    prompt: Prompt,
    schema: Value,
    params: GenerationParams,
    cancel: CancellationToken,
}

impl GenerationRequest {
    pub fn new(
        prompt: Prompt,
        schema: Value,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            origin: String::from("unknown"),
            prompt,
            schema,
            params,
            cancel,
        }
    }

    /// Tags the request with the name of the tool that issued it (used in events and logs).
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Same request with a different prompt.
    pub fn with_prompt(&self, prompt: Prompt) -> Self {
        Self {
            prompt,
            ..self.clone()
        }
    }

    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }
    #[inline]
    pub fn prompt(&self) -> &Prompt {
        &self.prompt
    }
    #[inline]
    pub fn schema(&self) -> &Value {
        &self.schema
    }
    #[inline]
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
    #[inline]
    pub fn mode(&self) -> ExecutionMode {
        self.params.mode
    }
    #[inline]
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }
}
