//! Wire format of the Generative Language REST API (the subset this crate speaks).
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lens_core::{BatchState, FinishReason};
use lens_model::UsageMetadata;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_mime_type: String,
    pub response_schema: Value,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    /// Code under review routinely trips content filters; structured review output does not
    /// need them.
    pub fn permissive() -> Vec<SafetySetting> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: "BLOCK_NONE".to_string(),
        })
        .collect()
    }
}

/// Body of `models/{model}:generateContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireFinishReason {
    #[default]
    FinishReasonUnspecified,
    Stop,
    MaxTokens,
    Safety,
    #[serde(other)]
    Other,
}

impl From<WireFinishReason> for FinishReason {
    fn from(r: WireFinishReason) -> Self {
        match r {
            WireFinishReason::FinishReasonUnspecified => FinishReason::Unspecified,
            WireFinishReason::Stop => FinishReason::Stop,
            WireFinishReason::MaxTokens => FinishReason::MaxTokens,
            WireFinishReason::Safety => FinishReason::Safety,
            WireFinishReason::Other => FinishReason::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<WireFinishReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl From<WireUsage> for UsageMetadata {
    fn from(u: WireUsage) -> Self {
        UsageMetadata {
            prompt_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<WireUsage>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }

    pub fn finish_reason(&self) -> FinishReason {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason)
            .unwrap_or_default()
            .into()
    }
}

/// Google error envelope: `{"error": {"code", "message", "status"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

// ---- batch ----------------------------------------------------------------

/// Body of `models/{model}:batchGenerateContent` with a single inlined request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchCreateRequest {
    pub batch: BatchSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSpec {
    pub display_name: String,
    pub input_config: BatchInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchInput {
    pub requests: InlinedRequests,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlinedRequests {
    pub requests: Vec<InlinedRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlinedRequest {
    pub request: GenerateContentRequest,
    pub metadata: Value,
}

impl BatchCreateRequest {
    pub fn single(display_name: impl Into<String>, request: GenerateContentRequest) -> Self {
        Self {
            batch: BatchSpec {
                display_name: display_name.into(),
                input_config: BatchInput {
                    requests: InlinedRequests {
                        requests: vec![InlinedRequest {
                            request,
                            metadata: serde_json::json!({"key": "request-1"}),
                        }],
                    },
                },
            },
        }
    }
}

/// Long-running operation returned by batch create and get.
///
/// The job state and output may sit at the top level or under `metadata`, depending on the
/// endpoint; accessors look in both places.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub metadata: Option<BatchMetadata>,
    #[serde(default)]
    pub response: Option<BatchOutput>,
    #[serde(default)]
    pub output: Option<BatchOutput>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub output: Option<BatchOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    #[serde(default)]
    pub inlined_responses: Option<InlinedResponses>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinedResponses {
    #[serde(default)]
    pub inlined_responses: Vec<InlinedResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InlinedResponse {
    #[serde(default)]
    pub response: Option<GenerateContentResponse>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

impl BatchOperation {
    pub fn job_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.metadata.as_ref()?.name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn raw_state(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.state.as_deref())
            .or(self.state.as_deref())
    }

    pub fn state(&self) -> BatchState {
        map_state(self.raw_state().unwrap_or_default())
    }

    /// First inlined response, wherever the endpoint put it.
    pub fn first_response(&self) -> Option<&InlinedResponse> {
        [
            self.response.as_ref(),
            self.metadata.as_ref().and_then(|m| m.output.as_ref()),
            self.output.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter_map(|o| o.inlined_responses.as_ref())
        .find_map(|r| r.inlined_responses.first())
    }
}

/// `BATCH_STATE_*` (or `JOB_STATE_*`) to the four client-side states. Unknown values poll on.
pub fn map_state(raw: &str) -> BatchState {
    let s = raw
        .trim_start_matches("BATCH_STATE_")
        .trim_start_matches("JOB_STATE_");
    match s {
        "SUCCEEDED" => BatchState::Succeeded,
        "FAILED" | "EXPIRED" => BatchState::Failed,
        "CANCELLED" => BatchState::Cancelled,
        _ => BatchState::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 4, "totalTokenCount": 7}
        }))
        .unwrap();

        assert_eq!(resp.text().as_deref(), Some("{\"a\":1}"));
        assert_eq!(resp.finish_reason(), FinishReason::Stop);
        assert_eq!(UsageMetadata::from(resp.usage_metadata.unwrap()).total_tokens, 7);
    }

    #[test]
    fn unknown_finish_reason_maps_to_other() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "RECITATION"}]
        }))
        .unwrap();
        assert_eq!(resp.finish_reason(), FinishReason::Other);
        assert!(resp.text().is_none());
    }

    #[test]
    fn batch_states_map_to_client_states() {
        assert_eq!(map_state("BATCH_STATE_PENDING"), BatchState::Running);
        assert_eq!(map_state("BATCH_STATE_RUNNING"), BatchState::Running);
        assert_eq!(map_state("BATCH_STATE_SUCCEEDED"), BatchState::Succeeded);
        assert_eq!(map_state("BATCH_STATE_FAILED"), BatchState::Failed);
        assert_eq!(map_state("BATCH_STATE_EXPIRED"), BatchState::Failed);
        assert_eq!(map_state("BATCH_STATE_CANCELLED"), BatchState::Cancelled);
        assert_eq!(map_state(""), BatchState::Running);
    }

    #[test]
    fn operation_reads_nested_metadata() {
        let op: BatchOperation = serde_json::from_value(json!({
            "name": "batches/abc",
            "metadata": {
                "state": "BATCH_STATE_SUCCEEDED",
                "output": {"inlinedResponses": {"inlinedResponses": [
                    {"response": {"candidates": [{"content": {"parts": [{"text": "{}"}]}}]}}
                ]}}
            }
        }))
        .unwrap();

        assert_eq!(op.job_name(), Some("batches/abc"));
        assert_eq!(op.state(), BatchState::Succeeded);
        let first = op.first_response().unwrap();
        assert_eq!(first.response.as_ref().unwrap().text().as_deref(), Some("{}"));
    }

    #[test]
    fn create_request_inlines_one_request() {
        let req = GenerateContentRequest {
            contents: vec![Content::user("hi")],
            system_instruction: None,
            generation_config: GenerationConfig {
                response_mime_type: "application/json".into(),
                response_schema: json!({"type": "object"}),
                temperature: 0.2,
                max_output_tokens: 10,
            },
            safety_settings: vec![],
        };
        let body = serde_json::to_value(BatchCreateRequest::single("lens", req)).unwrap();
        let inlined = &body["batch"]["inputConfig"]["requests"]["requests"];
        assert_eq!(inlined.as_array().unwrap().len(), 1);
        assert_eq!(
            inlined[0]["request"]["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }
}
