//! Asynchronous job execution: submit, poll until terminal or deadline, tear down on failure.
//!
//! Job lifecycle as seen from here: `created -> polling -> {succeeded, failed, cancelled, timed_out}`.
//! Each poll iteration checks, in order, caller cancellation, the deadline (measured from job
//! creation) and the reported remote state.
use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    event::{DispatchEvent, DispatchEventKind, EventBus},
    executor::parse_structured,
};
use crate::{
    BatchHandle, BatchState, BatchStatus, GenerationError, GenerationRequest, RetryPolicy,
    RetryState, RetryStep, Upstream,
};

/// Poll failures tolerated (per poll) before the job is given up.
pub const DEFAULT_POLL_RETRIES: u32 = 3;
/// Upper bound of the best-effort remote cancel call.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct BatchExecutor {
    upstream: Arc<dyn Upstream>,
    events: EventBus,
    poll_interval: Duration,
    deadline: Duration,
    poll_retries: u32,
    cancel_timeout: Duration,
    retry: RetryPolicy,
}

/// Where a job stands at a failed exit; decides whether remote teardown is needed.
struct JobExit {
    error: GenerationError,
    remote_live: bool,
}

impl JobExit {
    fn live(error: GenerationError) -> Self {
        Self {
            error,
            remote_live: true,
        }
    }

    fn settled(error: GenerationError) -> Self {
        Self {
            error,
            remote_live: false,
        }
    }
}

impl BatchExecutor {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        events: EventBus,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            upstream,
            events,
            poll_interval,
            deadline,
            poll_retries: DEFAULT_POLL_RETRIES,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Backoff policy applied to failing poll requests.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_retries(mut self, retries: u32) -> Self {
        self.poll_retries = retries;
        self
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[inline]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Runs `request` as a remote job and parses the job's result body.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        attempt: u32,
    ) -> Result<Value, GenerationError> {
        let cancel = request.cancel();
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        // Submission is one upstream call: bounded by the per-call timeout, not the job deadline.
        let timeout_ms = request.params().timeout_ms;
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            res = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.upstream.create_batch(request),
            ) => res.unwrap_or(Err(GenerationError::Timeout { timeout_ms })),
        };
        let handle = submitted?.ok_or(GenerationError::BatchSubmit)?;
        let created_at = Instant::now();

        self.events.emit(
            DispatchEvent::new(
                DispatchEventKind::BatchSubmitted,
                request.origin(),
                request.mode(),
                attempt,
            )
            .with_reason(handle.to_string()),
        );
        debug!(job = %handle, origin = request.origin(), "batch job submitted");

        match self.poll(request, &handle, created_at, attempt).await {
            Ok(body) => parse_structured(&body),
            Err(exit) => {
                if exit.remote_live {
                    self.cancel_remote(request, &handle, attempt, &exit.error)
                        .await;
                }
                Err(exit.error)
            }
        }
    }

    async fn poll(
        &self,
        request: &GenerationRequest,
        handle: &BatchHandle,
        created_at: Instant,
        attempt: u32,
    ) -> Result<String, JobExit> {
        let cancel = request.cancel();
        let deadline_ms = self.deadline.as_millis() as u64;
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(JobExit::live(GenerationError::Cancelled));
            }
            let remaining = self.deadline.saturating_sub(created_at.elapsed());
            if remaining.is_zero() {
                return Err(JobExit::live(GenerationError::Timeout {
                    timeout_ms: deadline_ms,
                }));
            }

            let status = self
                .fetch(request, handle, remaining, deadline_ms)
                .await
                .map_err(JobExit::live)?;
            polls += 1;
            self.events.emit(
                DispatchEvent::new(
                    DispatchEventKind::BatchPolled,
                    request.origin(),
                    request.mode(),
                    attempt,
                )
                .with_latency(created_at.elapsed())
                .with_reason(status.state.as_str()),
            );

            match status.state {
                BatchState::Running => {
                    let remaining = self.deadline.saturating_sub(created_at.elapsed());
                    let nap = self.poll_interval.min(remaining);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(JobExit::live(GenerationError::Cancelled));
                        }
                        _ = tokio::time::sleep(nap) => {}
                    }
                }
                BatchState::Succeeded if status.truncated => {
                    return Err(JobExit::settled(GenerationError::Truncated {
                        limit: request.params().max_output_tokens,
                    }));
                }
                BatchState::Succeeded => {
                    debug!(job = %handle, polls, "batch job succeeded");
                    return match status.body {
                        Some(body) if !body.trim().is_empty() => Ok(body),
                        _ => Err(JobExit::settled(GenerationError::BatchFailed {
                            state: BatchState::Succeeded,
                            detail: "job reported success but returned no response body".into(),
                        })),
                    };
                }
                state @ (BatchState::Failed | BatchState::Cancelled) => {
                    let detail = status
                        .error
                        .unwrap_or_else(|| format!("job ended {state} without error detail"));
                    return Err(JobExit::settled(GenerationError::BatchFailed { state, detail }));
                }
            }
        }
    }

    /// One poll, retried on transient failures. Never outlives the remaining deadline.
    async fn fetch(
        &self,
        request: &GenerationRequest,
        handle: &BatchHandle,
        remaining: Duration,
        deadline_ms: u64,
    ) -> Result<BatchStatus, GenerationError> {
        let cancel = request.cancel();
        let until = Instant::now() + remaining;
        let mut state = RetryState::initial();

        loop {
            let left = until.saturating_duration_since(Instant::now());
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GenerationError::Cancelled),
                res = tokio::time::timeout(left, self.upstream.get_batch(handle)) => {
                    res.unwrap_or(Err(GenerationError::Timeout { timeout_ms: deadline_ms }))
                }
            };
            let err = match res {
                Ok(status) => return Ok(status),
                Err(e) => e,
            };

            match state.after_failure(err, &self.retry, self.poll_retries) {
                RetryStep::Retry { next, delay } => {
                    warn!(
                        job = %handle,
                        attempt = next.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = ?next.last_error(),
                        "batch poll failed; retrying"
                    );
                    let left = until.saturating_duration_since(Instant::now());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                        _ = tokio::time::sleep(delay.min(left)) => {}
                    }
                    state = next;
                }
                RetryStep::Fatal(e) | RetryStep::Exhausted(e) => return Err(e),
            }
        }
    }

    /// Best-effort remote teardown. Failures are logged and reported as events only.
    async fn cancel_remote(
        &self,
        request: &GenerationRequest,
        handle: &BatchHandle,
        attempt: u32,
        cause: &GenerationError,
    ) {
        self.events.emit(
            DispatchEvent::new(
                DispatchEventKind::BatchCancelRequested,
                request.origin(),
                request.mode(),
                attempt,
            )
            .with_reason(cause.to_string()),
        );

        let failure = match tokio::time::timeout(
            self.cancel_timeout,
            self.upstream.cancel_batch(handle),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(job = %handle, "remote batch job cancelled");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "cancel call timed out after {} ms",
                self.cancel_timeout.as_millis()
            ),
        };

        warn!(job = %handle, error = %failure, "failed to cancel remote batch job");
        self.events.emit(
            DispatchEvent::new(
                DispatchEventKind::BatchCancelFailed,
                request.origin(),
                request.mode(),
                attempt,
            )
            .with_reason(failure),
        );
    }
}
