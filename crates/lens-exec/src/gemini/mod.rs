//! [`Upstream`] over the Gemini Generative Language REST API.
//!
//! Timeouts and cancellation are owned by the executors; this client only performs the calls and
//! maps transport and API failures onto [`GenerationError`].
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use lens_core::{
    BatchHandle, BatchState, BatchStatus, Completion, GenerationError, GenerationRequest, Upstream,
};
use reqwest::{StatusCode, header::HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use types::{
    BatchCreateRequest, BatchOperation, Content, ErrorEnvelope, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig, SafetySetting,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_API_VERSION: &str = "v1beta";
pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_BASE_URL: &str = "GEMINI_BASE_URL";

const API_KEY_HEADER: &str = "x-goog-api-key";
/// Transport failures carry this code so the retry classifier treats them as transient.
const TRANSPORT_CODE: &str = "UNAVAILABLE";

#[derive(Error, Debug)]
pub enum GeminiError {
    #[error("missing API key (set {ENV_API_KEY})")]
    MissingApiKey,
    #[error("invalid API key header value")]
    InvalidApiKey,
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub connect_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `GEMINI_API_KEY` (required) and `GEMINI_BASE_URL` (optional).
    pub fn from_env() -> Result<Self, GeminiError> {
        let key = std::env::var(ENV_API_KEY)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(GeminiError::MissingApiKey)?;
        let mut cfg = Self::new(key);
        if let Ok(url) = std::env::var(ENV_BASE_URL)
            && !url.trim().is_empty()
        {
            cfg.base_url = url;
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: HeaderValue,
    base_url: String,
    api_version: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        if config.api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }
        let mut api_key =
            HeaderValue::from_str(config.api_key.trim()).map_err(|_| GeminiError::InvalidApiKey)?;
        api_key.set_sensitive(true);

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/{}/models/{}:{}",
            self.base_url, self.api_version, model, method
        )
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, name)
    }

    async fn post<B, T>(&self, url: &str, body: &B) -> Result<T, GenerationError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        trace!(url, "POST");
        let resp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.clone())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, GenerationError> {
        trace!(url, "GET");
        let resp = self
            .http
            .get(url)
            .header(API_KEY_HEADER, self.api_key.clone())
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }
}

/// Request body shared by the interactive and batch paths.
pub fn build_request(request: &GenerationRequest) -> GenerateContentRequest {
    let params = request.params();
    let mut schema = request.schema().clone();
    if let Some(order) = &params.property_ordering
        && let Value::Object(map) = &mut schema
    {
        map.entry("propertyOrdering")
            .or_insert_with(|| Value::from(order.clone()));
    }

    let prompt = request.prompt();
    GenerateContentRequest {
        contents: vec![Content::user(prompt.user.clone())],
        system_instruction: (!prompt.system.is_empty())
            .then(|| Content::system(prompt.system.clone())),
        generation_config: GenerationConfig {
            response_mime_type: "application/json".to_string(),
            response_schema: schema,
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
        },
        safety_settings: SafetySetting::permissive(),
    }
}

fn transport_error(err: reqwest::Error) -> GenerationError {
    GenerationError::Upstream {
        status: err.status().map(|s| s.as_u16()),
        code: Some(TRANSPORT_CODE.to_string()),
        message: format!("transport error: {err}"),
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GenerationError> {
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| {
        GenerationError::upstream(format!("undecodable response from upstream: {e}"))
    })
}

/// Decodes the Google error envelope; falls back to the raw body.
pub fn api_error(status: StatusCode, body: &str) -> GenerationError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => GenerationError::Upstream {
            status: Some(env.error.code.unwrap_or(status.as_u16())),
            code: env.error.status,
            message: env.error.message,
        },
        Err(_) => {
            let mut message: String = body.chars().take(500).collect();
            if message.trim().is_empty() {
                message = status
                    .canonical_reason()
                    .unwrap_or("upstream error")
                    .to_string();
            }
            GenerationError::Upstream {
                status: Some(status.as_u16()),
                code: None,
                message,
            }
        }
    }
}

/// Client-side view of a polled operation.
pub fn batch_status(op: &BatchOperation) -> BatchStatus {
    let op_error = op.error.as_ref().map(|e| e.message.clone());
    match op.state() {
        BatchState::Running => BatchStatus::running(),
        BatchState::Succeeded => match op.first_response() {
            Some(inlined) => match (&inlined.response, &inlined.error) {
                (_, Some(err)) => BatchStatus::failed(BatchState::Failed, Some(err.message.clone())),
                (Some(resp), None)
                    if resp.finish_reason() == lens_core::FinishReason::MaxTokens =>
                {
                    BatchStatus::truncated()
                }
                (Some(resp), None) => BatchStatus {
                    state: BatchState::Succeeded,
                    body: resp.text(),
                    error: None,
                    truncated: false,
                },
                (None, None) => BatchStatus::failed(BatchState::Succeeded, op_error),
            },
            None => BatchStatus {
                state: BatchState::Succeeded,
                body: None,
                error: op_error,
                truncated: false,
            },
        },
        state => BatchStatus::failed(state, op_error),
    }
}

#[async_trait]
impl Upstream for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, GenerationError> {
        let url = self.model_url(&request.params().model, "generateContent");
        let resp: GenerateContentResponse = self.post(&url, &build_request(request)).await?;
        Ok(Completion {
            text: resp.text(),
            usage: resp.usage_metadata.map(Into::into),
            finish_reason: resp.finish_reason(),
        })
    }

    async fn create_batch(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<BatchHandle>, GenerationError> {
        let url = self.model_url(&request.params().model, "batchGenerateContent");
        let body = BatchCreateRequest::single(
            format!("lens-{}", request.origin()),
            build_request(request),
        );
        let op: BatchOperation = self.post(&url, &body).await?;
        let handle = op.job_name().map(BatchHandle::new);
        debug!(job = ?handle, "batch create answered");
        Ok(handle)
    }

    async fn get_batch(&self, handle: &BatchHandle) -> Result<BatchStatus, GenerationError> {
        let op: BatchOperation = self.get(&self.resource_url(&handle.name)).await?;
        Ok(batch_status(&op))
    }

    async fn cancel_batch(&self, handle: &BatchHandle) -> Result<(), GenerationError> {
        let url = format!("{}:cancel", self.resource_url(&handle.name));
        let _: Value = self.post(&url, &serde_json::json!({})).await?;
        Ok(())
    }
}
