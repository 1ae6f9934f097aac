//! Structured-generation dispatcher.
//!
//! ## Overview
//!
//! [`Dispatcher::dispatch`] is the single entry point used by tool runners:
//!
//! 1. picks the admission pool matching the request's [`ExecutionMode`];
//! 2. waits for a [`Permit`](crate::Permit) (FIFO, bounded by the admission wait-timeout);
//! 3. runs the [`RequestExecutor`] or [`BatchExecutor`] inside a retry loop driven by
//!    [`RetryState`]: transient failures sleep a jittered backoff and try again with the
//!    unmodified request, anything else surfaces at once;
//! 4. releases the slot when the permit drops, on every exit path.
//!
//! Every admission result, attempt and retry decision is published on the [`EventBus`].
mod batch;
mod event;
mod executor;

pub use batch::{BatchExecutor, DEFAULT_CANCEL_TIMEOUT, DEFAULT_POLL_RETRIES};
pub use event::{DispatchEvent, DispatchEventKind, EventBus, Subscribe};
pub use executor::{RequestExecutor, parse_structured};

use std::sync::Arc;

use lens_model::ExecutionMode;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    AdmissionController, GenerationError, GenerationRequest, LensConfig, RetryPolicy, RetryState,
    RetryStep, Upstream,
};

pub const INTERACTIVE_POOL: &str = "interactive";
pub const BATCH_POOL: &str = "batch";

#[derive(Clone)]
pub struct Dispatcher {
    interactive: AdmissionController,
    batch: AdmissionController,
    executor: RequestExecutor,
    batch_executor: BatchExecutor,
    retry: RetryPolicy,
    events: EventBus,
}

impl Dispatcher {
    pub fn builder(upstream: Arc<dyn Upstream>, config: &LensConfig) -> DispatcherBuilder {
        DispatcherBuilder {
            upstream,
            config: config.clone(),
            subscribers: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn interactive_pool(&self) -> &AdmissionController {
        &self.interactive
    }

    pub fn batch_pool(&self) -> &AdmissionController {
        &self.batch
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn pool_for(&self, mode: ExecutionMode) -> &AdmissionController {
        match mode {
            ExecutionMode::Interactive => &self.interactive,
            ExecutionMode::Batch => &self.batch,
        }
    }

    /// Acquire a slot, run the request with retries, release the slot.
    pub async fn dispatch(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let pool = self.pool_for(request.mode());
        let event = |kind, attempt| {
            DispatchEvent::new(kind, request.origin(), request.mode(), attempt)
        };

        let _permit = match pool.acquire(request.cancel()).await {
            Ok(permit) => {
                self.events.emit(event(DispatchEventKind::SlotAcquired, 0));
                permit
            }
            Err(e) => {
                debug!(pool = pool.name(), origin = request.origin(), error = %e, "admission rejected");
                self.events
                    .emit(event(DispatchEventKind::SlotRejected, 0).with_reason(e.to_string()));
                return Err(e.into());
            }
        };

        let max_retries = request.params().max_retries;
        let mut state = RetryState::initial();
        loop {
            let attempt = state.attempt();
            self.events.emit(event(DispatchEventKind::AttemptStarted, attempt));

            let result = match request.mode() {
                ExecutionMode::Interactive => self.executor.execute(request, attempt).await,
                ExecutionMode::Batch => self.batch_executor.execute(request, attempt).await,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match state.after_failure(err, &self.retry, max_retries) {
                RetryStep::Retry { next, delay } => {
                    let reason = next
                        .last_error()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    info!(
                        origin = request.origin(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient upstream failure; retrying"
                    );
                    self.events.emit(
                        event(DispatchEventKind::RetryScheduled, attempt)
                            .with_delay(delay)
                            .with_reason(reason),
                    );
                    tokio::select! {
                        biased;
                        _ = request.cancel().cancelled() => return Err(GenerationError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    state = next;
                }
                RetryStep::Exhausted(e) => {
                    warn!(origin = request.origin(), attempts = attempt + 1, error = %e, "retries exhausted");
                    self.events.emit(
                        event(DispatchEventKind::RetriesExhausted, attempt).with_reason(e.to_string()),
                    );
                    return Err(e);
                }
                RetryStep::Fatal(e) => {
                    self.events.emit(
                        event(DispatchEventKind::FatalError, attempt).with_reason(e.to_string()),
                    );
                    return Err(e);
                }
            }
        }
    }
}

pub struct DispatcherBuilder {
    upstream: Arc<dyn Upstream>,
    config: LensConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    retry: RetryPolicy,
}

impl DispatcherBuilder {
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Dispatcher {
        let cfg = &self.config;
        let events = EventBus::new(self.subscribers);
        let wait = cfg.admission_wait();

        Dispatcher {
            interactive: AdmissionController::new(
                INTERACTIVE_POOL,
                limit(cfg.max_concurrent),
                wait,
            ),
            batch: AdmissionController::new(BATCH_POOL, limit(cfg.max_concurrent_batch), wait),
            executor: RequestExecutor::new(self.upstream.clone(), events.clone()),
            batch_executor: BatchExecutor::new(
                self.upstream,
                events.clone(),
                cfg.batch_poll_interval(),
                cfg.batch_deadline(),
            )
            .with_retry_policy(self.retry.clone()),
            retry: self.retry,
            events,
        }
    }
}

fn limit(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX).max(1)
}
