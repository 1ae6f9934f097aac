use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::event::{DispatchEvent, DispatchEventKind, EventBus};
use crate::{Completion, FinishReason, GenerationError, GenerationRequest, Upstream};

/// Performs one interactive completion call under the request's timeout and cancellation token.
#[derive(Clone)]
pub struct RequestExecutor {
    upstream: Arc<dyn Upstream>,
    events: EventBus,
}

impl RequestExecutor {
    pub fn new(upstream: Arc<dyn Upstream>, events: EventBus) -> Self {
        Self { upstream, events }
    }

    /// Runs attempt `attempt` of `request` and parses the structured payload.
    ///
    /// Whichever fires first wins: the caller's token (`Cancelled`) or the per-call timer
    /// (`Timeout`). In both cases the in-flight upstream future is dropped.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        attempt: u32,
    ) -> Result<Value, GenerationError> {
        let timeout_ms = request.params().timeout_ms;
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = request.cancel().cancelled() => Err(GenerationError::Cancelled),
            res = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.upstream.generate(request),
            ) => res.unwrap_or(Err(GenerationError::Timeout { timeout_ms })),
        };

        let usage = outcome.as_ref().ok().and_then(|c| c.usage);
        let result =
            outcome.and_then(|c| interpret(c, request.params().max_output_tokens));

        let kind = match &result {
            Ok(_) => DispatchEventKind::AttemptSucceeded,
            Err(_) => DispatchEventKind::AttemptFailed,
        };
        let mut event = DispatchEvent::new(kind, request.origin(), request.mode(), attempt)
            .with_latency(started.elapsed())
            .with_usage(usage);
        if let Err(e) = &result {
            event = event.with_reason(e.to_string());
        }
        self.events.emit(event);

        debug!(
            upstream = self.upstream.name(),
            origin = request.origin(),
            attempt,
            ok = result.is_ok(),
            "interactive attempt finished"
        );
        result
    }
}

fn interpret(completion: Completion, limit: u32) -> Result<Value, GenerationError> {
    if completion.finish_reason == FinishReason::MaxTokens {
        return Err(GenerationError::Truncated { limit });
    }
    parse_structured(completion.text.as_deref().unwrap_or_default())
}

/// Reads a completion body as JSON.
///
/// Tolerates a surrounding markdown code fence. Empty bodies are `NoContent`; anything else that
/// does not parse is `Malformed`.
pub fn parse_structured(text: &str) -> Result<Value, GenerationError> {
    let body = strip_fence(text.trim());
    if body.is_empty() {
        return Err(GenerationError::NoContent);
    }
    serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening line.
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
