use std::borrow::Borrow;

use lens_core::{DispatchEvent, DispatchEventKind};
use tracing::{debug, error, info, trace, warn};

/// Read-only accessors with log-friendly defaults.
pub trait View {
    fn kind(&self) -> DispatchEventKind;
    fn origin(&self) -> &str;
    fn mode(&self) -> &'static str;
    fn attempt(&self) -> u32;
    fn delay_ms(&self) -> u64;
    fn latency_ms(&self) -> u64;
    fn reason(&self) -> &str;
    fn output_tokens(&self) -> u32;
}

impl<T> View for T
where
    T: Borrow<DispatchEvent>,
{
    #[inline]
    fn kind(&self) -> DispatchEventKind {
        self.borrow().kind
    }
    #[inline]
    fn origin(&self) -> &str {
        &self.borrow().origin
    }
    #[inline]
    fn mode(&self) -> &'static str {
        self.borrow().mode.as_str()
    }
    #[inline]
    fn attempt(&self) -> u32 {
        self.borrow().attempt
    }
    #[inline]
    fn delay_ms(&self) -> u64 {
        self.borrow().delay_ms.unwrap_or(0)
    }
    #[inline]
    fn latency_ms(&self) -> u64 {
        self.borrow().latency_ms.unwrap_or(0)
    }
    #[inline]
    fn reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn output_tokens(&self) -> u32 {
        self.borrow().usage.map(|u| u.output_tokens).unwrap_or(0)
    }
}

#[inline]
pub fn message_for(kind: DispatchEventKind) -> &'static str {
    match kind {
        // admission
        DispatchEventKind::SlotAcquired => "admission slot acquired",
        DispatchEventKind::SlotRejected => "admission rejected (pool busy or caller cancelled)",

        // attempts
        DispatchEventKind::AttemptStarted => "upstream attempt started",
        DispatchEventKind::AttemptSucceeded => "upstream attempt succeeded",
        DispatchEventKind::AttemptFailed => "upstream attempt failed",

        // retry
        DispatchEventKind::RetryScheduled => "transient failure; retry scheduled",
        DispatchEventKind::RetriesExhausted => "retry ceiling reached; giving up",
        DispatchEventKind::FatalError => "non-transient failure; not retried",

        // batch
        DispatchEventKind::BatchSubmitted => "batch job submitted",
        DispatchEventKind::BatchPolled => "batch job polled",
        DispatchEventKind::BatchCancelRequested => "remote cancellation of batch job requested",
        DispatchEventKind::BatchCancelFailed => "remote cancellation of batch job failed",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        DispatchEventKind::SlotAcquired => {
            trace!(origin = e.origin(), mode = e.mode(), "{msg}")
        }
        DispatchEventKind::SlotRejected => {
            warn!(origin = e.origin(), mode = e.mode(), reason = e.reason(), "{msg}")
        }

        DispatchEventKind::AttemptStarted => {
            debug!(origin = e.origin(), mode = e.mode(), attempt = e.attempt(), "{msg}")
        }
        DispatchEventKind::AttemptSucceeded => info!(
            origin = e.origin(),
            mode = e.mode(),
            attempt = e.attempt(),
            latency_ms = e.latency_ms(),
            output_tokens = e.output_tokens(),
            "{msg}"
        ),
        DispatchEventKind::AttemptFailed => debug!(
            origin = e.origin(),
            attempt = e.attempt(),
            latency_ms = e.latency_ms(),
            reason = e.reason(),
            "{msg}"
        ),

        DispatchEventKind::RetryScheduled => debug!(
            origin = e.origin(),
            attempt = e.attempt(),
            delay_ms = e.delay_ms(),
            reason = e.reason(),
            "{msg}"
        ),
        DispatchEventKind::RetriesExhausted => {
            error!(origin = e.origin(), attempt = e.attempt(), reason = e.reason(), "{msg}")
        }
        DispatchEventKind::FatalError => {
            error!(origin = e.origin(), attempt = e.attempt(), reason = e.reason(), "{msg}")
        }

        DispatchEventKind::BatchSubmitted => info!(origin = e.origin(), job = e.reason(), "{msg}"),
        DispatchEventKind::BatchPolled => {
            trace!(origin = e.origin(), poll = e.attempt(), state = e.reason(), "{msg}")
        }
        DispatchEventKind::BatchCancelRequested => {
            warn!(origin = e.origin(), job = e.reason(), "{msg}")
        }
        DispatchEventKind::BatchCancelFailed => {
            warn!(origin = e.origin(), reason = e.reason(), "{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_model::{ExecutionMode, UsageMetadata};

    #[test]
    fn defaults_fill_missing_fields() {
        let ev = DispatchEvent::new(
            DispatchEventKind::AttemptFailed,
            "review_diff",
            ExecutionMode::Batch,
            2,
        );
        assert_eq!(ev.origin(), "review_diff");
        assert_eq!(ev.mode(), "batch");
        assert_eq!(ev.reason(), "unknown");
        assert_eq!(ev.delay_ms(), 0);
        assert_eq!(ev.output_tokens(), 0);

        let ev = ev.with_usage(Some(UsageMetadata {
            prompt_tokens: 10,
            output_tokens: 4,
            total_tokens: 14,
        }));
        assert_eq!((&ev).output_tokens(), 4);
    }
}
