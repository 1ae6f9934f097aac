use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use lens_core::TaskStore;
use lens_model::{Progress, TaskId};
use tracing::{debug, warn};

/// Upper bound of every progress sequence.
pub const PROGRESS_TOTAL: u32 = 100;

/// Runner stage of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Starting,
    Validating,
    BuildingPrompt,
    CallingModel,
    ValidatingResponse,
    Finalizing,
}

impl Stage {
    /// Progress reported on entering the stage.
    pub fn milestone(&self) -> u32 {
        match self {
            Stage::Starting => 0,
            Stage::Validating => 10,
            Stage::BuildingPrompt => 20,
            Stage::CallingModel => 30,
            Stage::ValidatingResponse => 80,
            Stage::Finalizing => 90,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Starting => "starting",
            Stage::Validating => "validating input",
            Stage::BuildingPrompt => "building prompt",
            Stage::CallingModel => "calling model",
            Stage::ValidatingResponse => "validating response",
            Stage::Finalizing => "finalizing",
        }
    }
}

/// Receiver of progress notifications (e.g. a transport streaming them to the caller).
///
/// Delivery is best-effort: errors and panics are logged and otherwise ignored.
pub trait ProgressReporter: Send + Sync + 'static {
    fn report(&self, task: &TaskId, progress: &Progress) -> anyhow::Result<()>;
}

/// Reporter that drops every notification.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _task: &TaskId, _progress: &Progress) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-invocation progress state: keeps the sequence non-decreasing and mirrors it into the
/// task store.
pub(crate) struct ProgressTracker {
    task: TaskId,
    store: TaskStore,
    reporter: Arc<dyn ProgressReporter>,
    current: u32,
    finished: bool,
}

impl ProgressTracker {
    pub(crate) fn new(task: TaskId, store: TaskStore, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            task,
            store,
            reporter,
            current: 0,
            finished: false,
        }
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        self.emit(stage.milestone(), stage.label().to_string());
    }

    /// Note at the current level, e.g. a repair round.
    pub(crate) fn note(&mut self, message: String) {
        self.emit(self.current, message);
    }

    /// Terminal notification; always the last one.
    pub(crate) fn finish(&mut self, message: String) {
        self.emit(PROGRESS_TOTAL, message);
        self.finished = true;
    }

    fn emit(&mut self, value: u32, message: String) {
        if self.finished {
            return;
        }
        self.current = self.current.max(value).min(PROGRESS_TOTAL);
        let progress = Progress::new(self.current, PROGRESS_TOTAL).with_message(message);

        if let Err(e) = self.store.update_progress(&self.task, progress.clone()) {
            debug!(task = %self.task, error = %e, "progress not stored");
        }

        let delivered = catch_unwind(AssertUnwindSafe(|| {
            self.reporter.report(&self.task, &progress)
        }));
        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = %self.task, error = %e, "progress notification failed"),
            Err(_) => warn!(task = %self.task, "progress reporter panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u32>>);

    impl ProgressReporter for Collect {
        fn report(&self, _task: &TaskId, p: &Progress) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(p.current);
            Ok(())
        }
    }

    struct Failing;

    impl ProgressReporter for Failing {
        fn report(&self, _task: &TaskId, _p: &Progress) -> anyhow::Result<()> {
            anyhow::bail!("client went away")
        }
    }

    #[test]
    fn sequence_is_monotone_and_ends_at_total() {
        let store = TaskStore::new();
        let id = store.create_task("t");
        let sink = Arc::new(Collect::default());
        let mut t = ProgressTracker::new(id.clone(), store.clone(), sink.clone());

        t.enter(Stage::Starting);
        t.enter(Stage::CallingModel);
        t.enter(Stage::ValidatingResponse);
        // Repair loops back to CallingModel.
        t.enter(Stage::CallingModel);
        t.finish("done".into());
        t.enter(Stage::Finalizing);

        assert_eq!(*sink.0.lock().unwrap(), vec![0, 30, 80, 80, 100]);
        assert_eq!(store.get(&id).unwrap().progress.unwrap().current, 100);
    }

    #[test]
    fn failing_reporter_is_swallowed() {
        let store = TaskStore::new();
        let id = store.create_task("t");
        let mut t = ProgressTracker::new(id.clone(), store.clone(), Arc::new(Failing));
        t.enter(Stage::Validating);
        t.finish("done".into());
        assert_eq!(store.get(&id).unwrap().progress.unwrap().current, 100);
    }
}
