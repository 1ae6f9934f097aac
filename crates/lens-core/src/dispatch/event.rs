use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use lens_model::{ExecutionMode, UsageMetadata};
use tracing::warn;

/// What happened inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchEventKind {
    /// A slot was granted.
    SlotAcquired,
    /// Admission failed (busy or cancelled).
    SlotRejected,
    AttemptStarted,
    AttemptSucceeded,
    AttemptFailed,
    /// Transient failure; the next attempt waits `delay_ms`.
    RetryScheduled,
    /// Retry ceiling reached.
    RetriesExhausted,
    /// Non-transient failure; no retry.
    FatalError,
    BatchSubmitted,
    BatchPolled,
    BatchCancelRequested,
    BatchCancelFailed,
}

/// One observability record emitted by the dispatcher or its executors.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub kind: DispatchEventKind,
    /// Tool that issued the request.
    pub origin: String,
    pub mode: ExecutionMode,
    /// 0-based attempt index.
    pub attempt: u32,
    pub delay_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub reason: Option<String>,
    pub usage: Option<UsageMetadata>,
}

impl DispatchEvent {
    pub fn new(kind: DispatchEventKind, origin: &str, mode: ExecutionMode, attempt: u32) -> Self {
        Self {
            kind,
            origin: origin.to_string(),
            mode,
            attempt,
            delay_ms: None,
            latency_ms: None,
            reason: None,
            usage: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_usage(mut self, usage: Option<UsageMetadata>) -> Self {
        self.usage = usage;
        self
    }
}

/// Receiver of dispatch events.
///
/// Delivery is synchronous and best-effort: a panicking subscriber is logged and skipped.
pub trait Subscribe: Send + Sync + 'static {
    fn on_event(&self, event: &DispatchEvent);

    fn name(&self) -> &'static str;
}

/// Fan-out of dispatch events to every registered subscriber.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Vec<Arc<dyn Subscribe>>>,
}

impl EventBus {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            subscribers: Arc::new(subscribers),
        }
    }

    pub fn emit(&self, event: DispatchEvent) {
        for sub in self.subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| sub.on_event(&event))).is_err() {
                warn!(
                    subscriber = sub.name(),
                    kind = ?event.kind,
                    "dispatch event subscriber panicked; event dropped for it"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<DispatchEventKind>>);

    impl Subscribe for Recorder {
        fn on_event(&self, event: &DispatchEvent) {
            self.0.lock().unwrap().push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    impl Subscribe for Panicker {
        fn on_event(&self, _event: &DispatchEvent) {
            panic!("subscriber bug");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let bus = EventBus::new(vec![Arc::new(Panicker), recorder.clone()]);

        bus.emit(DispatchEvent::new(
            DispatchEventKind::AttemptStarted,
            "review_diff",
            ExecutionMode::Interactive,
            0,
        ));

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![DispatchEventKind::AttemptStarted]
        );
    }

    #[test]
    fn builder_helpers_fill_fields() {
        let ev = DispatchEvent::new(
            DispatchEventKind::RetryScheduled,
            "t",
            ExecutionMode::Batch,
            2,
        )
        .with_delay(Duration::from_millis(1500))
        .with_reason("503");
        assert_eq!(ev.delay_ms, Some(1500));
        assert_eq!(ev.reason.as_deref(), Some("503"));
        assert_eq!(ev.attempt, 2);
    }
}
