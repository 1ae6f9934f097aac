use lens_core::{DispatchEvent, Subscribe};

use crate::subscriber::view::log_event;

/// Writes every dispatch event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for Journal {
    fn on_event(&self, event: &DispatchEvent) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::DispatchEventKind;
    use lens_model::ExecutionMode;

    #[test]
    fn logs_every_kind_without_a_subscriber_installed() {
        let kinds = [
            DispatchEventKind::SlotAcquired,
            DispatchEventKind::SlotRejected,
            DispatchEventKind::AttemptStarted,
            DispatchEventKind::AttemptSucceeded,
            DispatchEventKind::AttemptFailed,
            DispatchEventKind::RetryScheduled,
            DispatchEventKind::RetriesExhausted,
            DispatchEventKind::FatalError,
            DispatchEventKind::BatchSubmitted,
            DispatchEventKind::BatchPolled,
            DispatchEventKind::BatchCancelRequested,
            DispatchEventKind::BatchCancelFailed,
        ];
        let journal = Journal::new();
        for kind in kinds {
            assert!(!crate::message_for(kind).is_empty());
            journal.on_event(&DispatchEvent::new(kind, "t", ExecutionMode::Interactive, 0));
        }
        assert_eq!(journal.name(), "journal");
    }
}
