//! Transient-failure classification and capped exponential backoff with jitter.
//!
//! [`RetryPolicy`] is stateless and safe to share between any number of in-flight requests.
//! The per-request bookkeeping lives in [`RetryState`], an immutable value advanced by
//! [`RetryState::after_failure`].
use std::{sync::LazyLock, time::Duration};

use regex::Regex;

use crate::GenerationError;

/// HTTP statuses the upstream uses for transient conditions.
pub const TRANSIENT_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Named upstream status codes that denote transient conditions.
pub const TRANSIENT_CODES: [&str; 5] = [
    "RESOURCE_EXHAUSTED",
    "UNAVAILABLE",
    "DEADLINE_EXCEEDED",
    "INTERNAL",
    "ABORTED",
];

static TRANSIENT_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(rate.?limit|quota|overloaded|temporarily unavailable|try again|resource.?exhausted|unavailable|connection (reset|refused|closed)|econnreset|etimedout|socket hang up|timed? ?out|\b(429|500|502|503|504)\b)",
    )
    .expect("transient text pattern must compile")
});

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound of the exponential part.
    pub max_delay: Duration,
    /// Fraction of the capped delay added as uniform random jitter.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            max_delay: max_delay.max(base),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Whether the error denotes a transient upstream condition worth retrying.
    pub fn is_retryable(&self, err: &GenerationError) -> bool {
        is_transient(err)
    }

    /// Exponential delay for a 0-based attempt index, before jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff before retrying after `attempt` failed.
    ///
    /// Always within `[capped, capped * (1 + jitter_ratio)]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        let window = capped.as_secs_f64() * self.jitter_ratio;
        capped + Duration::from_secs_f64(window * rand::random::<f64>())
    }
}

/// Transient-condition classifier shared by the dispatcher and the batch poller.
pub fn is_transient(err: &GenerationError) -> bool {
    match err {
        GenerationError::Upstream {
            status,
            code,
            message,
        } => {
            status.is_some_and(|s| TRANSIENT_STATUS.contains(&s))
                || code
                    .as_deref()
                    .is_some_and(|c| TRANSIENT_CODES.contains(&c.to_ascii_uppercase().as_str()))
                || TRANSIENT_TEXT.is_match(message)
        }
        GenerationError::BatchFailed { detail, .. } => TRANSIENT_TEXT.is_match(detail),
        _ => false,
    }
}

/// Bookkeeping of one request's retry loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetryState {
    attempt: u32,
    last_error: Option<GenerationError>,
    last_delay: Duration,
}

/// Outcome of feeding a failure into [`RetryState::after_failure`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStep {
    /// Sleep `delay`, then attempt again with `next`.
    Retry { next: RetryState, delay: Duration },
    /// Error is not transient.
    Fatal(GenerationError),
    /// Retry ceiling reached.
    Exhausted(GenerationError),
}

impl RetryState {
    pub fn initial() -> Self {
        Self::default()
    }

    /// 0-based index of the attempt in progress.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub fn last_error(&self) -> Option<&GenerationError> {
        self.last_error.as_ref()
    }

    #[inline]
    pub fn last_delay(&self) -> Duration {
        self.last_delay
    }

    /// Decide what follows a failed attempt. `max_retries` counts retries after the first attempt.
    pub fn after_failure(
        self,
        err: GenerationError,
        policy: &RetryPolicy,
        max_retries: u32,
    ) -> RetryStep {
        if !policy.is_retryable(&err) {
            return RetryStep::Fatal(err);
        }
        if self.attempt >= max_retries {
            return RetryStep::Exhausted(err);
        }

        // Delays never shrink within one request, even when jitter would say so.
        let delay = policy.delay(self.attempt).max(self.last_delay);
        RetryStep::Retry {
            next: RetryState {
                attempt: self.attempt + 1,
                last_error: Some(err),
                last_delay: delay,
            },
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> GenerationError {
        GenerationError::Upstream {
            status: Some(code),
            code: None,
            message: "x".into(),
        }
    }

    #[test]
    fn classifies_transient_conditions() {
        let p = RetryPolicy::default();
        for s in TRANSIENT_STATUS {
            assert!(p.is_retryable(&status(s)), "status {s}");
        }
        assert!(!p.is_retryable(&status(400)));
        assert!(!p.is_retryable(&status(403)));

        let named = GenerationError::Upstream {
            status: None,
            code: Some("resource_exhausted".into()),
            message: "quota".into(),
        };
        assert!(p.is_retryable(&named));
        assert!(p.is_retryable(&GenerationError::upstream("socket hang up")));
        assert!(p.is_retryable(&GenerationError::upstream(
            "The model is overloaded. Please try again later."
        )));
        assert!(!p.is_retryable(&GenerationError::upstream("API key not valid")));
    }

    #[test]
    fn local_failures_are_fatal() {
        let p = RetryPolicy::default();
        assert!(!p.is_retryable(&GenerationError::Timeout { timeout_ms: 10 }));
        assert!(!p.is_retryable(&GenerationError::Cancelled));
        assert!(!p.is_retryable(&GenerationError::Malformed("eof".into())));
        assert!(!p.is_retryable(&GenerationError::NoContent));
        assert!(!p.is_retryable(&GenerationError::Truncated { limit: 1 }));
        assert!(!p.is_retryable(&GenerationError::Busy {
            pool: "interactive",
            waited_ms: 1
        }));
    }

    #[test]
    fn capped_delay_is_non_decreasing_and_capped() {
        let p = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(2), 0.2);
        let mut prev = Duration::ZERO;
        for attempt in 0..40 {
            let d = p.capped_delay(attempt);
            assert!(d >= prev);
            assert!(d <= Duration::from_secs(2));
            prev = d;
        }
        assert_eq!(p.capped_delay(0), Duration::from_millis(100));
        assert_eq!(p.capped_delay(3), Duration::from_millis(800));
        assert_eq!(p.capped_delay(10), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_in_window_and_varies() {
        let p = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(2), 0.2);
        let capped = p.capped_delay(2);
        let upper = capped.mul_f64(1.2);

        let samples: Vec<Duration> = (0..1000).map(|_| p.delay(2)).collect();
        assert!(samples.iter().all(|d| *d >= capped && *d <= upper));

        let first = samples[0];
        let same = samples.iter().filter(|d| **d == first).count();
        assert!((same as f64) < 1000.0 * 0.8);
    }

    #[test]
    fn state_retries_until_ceiling() {
        let p = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(10), 0.2);
        let mut state = RetryState::initial();
        let mut retries = 0;
        loop {
            match state.after_failure(status(503), &p, 3) {
                RetryStep::Retry { next, delay } => {
                    assert!(delay >= Duration::from_millis(1));
                    assert_eq!(next.attempt(), retries + 1);
                    retries += 1;
                    state = next;
                }
                RetryStep::Exhausted(err) => {
                    assert_eq!(err, status(503));
                    break;
                }
                RetryStep::Fatal(_) => panic!("503 is transient"),
            }
        }
        assert_eq!(retries, 3);
    }

    #[test]
    fn state_delays_never_shrink() {
        let p = RetryPolicy::new(Duration::from_millis(50), Duration::from_millis(60), 0.2);
        let mut state = RetryState::initial();
        let mut prev = Duration::ZERO;
        for _ in 0..10 {
            match state.after_failure(status(429), &p, 100) {
                RetryStep::Retry { next, delay } => {
                    assert!(delay >= prev);
                    prev = delay;
                    state = next;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn non_transient_is_fatal_on_first_failure() {
        let p = RetryPolicy::default();
        let step = RetryState::initial().after_failure(status(400), &p, 5);
        assert_eq!(step, RetryStep::Fatal(status(400)));
    }
}
