use serde::{Deserialize, Serialize};

/// Selects how a generation request reaches the upstream service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// Synchronous completion call.
    #[default]
    Interactive,
    /// Asynchronous remote job, polled until it finishes.
    Batch,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Interactive => "interactive",
            ExecutionMode::Batch => "batch",
        }
    }
}

/// Opaque prompt payload: an instruction and the user content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Execution parameters of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Upstream model identifier.
    pub model: String,
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Output size ceiling in tokens.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Deterministic key ordering hint for the structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_ordering: Option<Vec<String>>,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            timeout_ms: 120_000,
            max_output_tokens: 8192,
            temperature: 0.2,
            max_retries: 3,
            property_ordering: None,
            mode: ExecutionMode::Interactive,
        }
    }
}

/// Token accounting reported by the upstream service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}
