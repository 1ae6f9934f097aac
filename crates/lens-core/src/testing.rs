//! Scripted in-memory [`Upstream`] for tests.
use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use lens_model::Prompt;

use crate::{
    BatchHandle, BatchStatus, Completion, GenerationError, GenerationRequest, Upstream,
};

enum Step<T> {
    Reply(Result<T, GenerationError>),
    Hang,
}

/// Upstream that replays queued replies and counts calls.
///
/// - `generate` pops the next scripted completion; an empty script is an internal error.
/// - `get_batch` pops the next scripted poll; an empty script reports `running`.
/// - `create_batch` pops the next scripted submission; an empty script returns `batches/test`.
#[derive(Default)]
pub struct ScriptedUpstream {
    completions: Mutex<VecDeque<Step<Completion>>>,
    polls: Mutex<VecDeque<Step<BatchStatus>>>,
    submissions: Mutex<VecDeque<Step<Option<BatchHandle>>>>,
    cancel_error: Mutex<Option<GenerationError>>,
    prompts: Mutex<Vec<Prompt>>,
    generate_calls: AtomicUsize,
    create_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push_completion(Completion::text(text))
    }

    pub fn push_completion(&self, completion: Completion) -> &Self {
        locked(&self.completions).push_back(Step::Reply(Ok(completion)));
        self
    }

    pub fn push_error(&self, err: GenerationError) -> &Self {
        locked(&self.completions).push_back(Step::Reply(Err(err)));
        self
    }

    /// Next `generate` never completes.
    pub fn push_hang(&self) -> &Self {
        locked(&self.completions).push_back(Step::Hang);
        self
    }

    pub fn push_poll(&self, status: BatchStatus) -> &Self {
        locked(&self.polls).push_back(Step::Reply(Ok(status)));
        self
    }

    pub fn push_poll_error(&self, err: GenerationError) -> &Self {
        locked(&self.polls).push_back(Step::Reply(Err(err)));
        self
    }

    pub fn push_submission(&self, result: Result<Option<BatchHandle>, GenerationError>) -> &Self {
        locked(&self.submissions).push_back(Step::Reply(result));
        self
    }

    /// Next `create_batch` never completes.
    pub fn push_submission_hang(&self) -> &Self {
        locked(&self.submissions).push_back(Step::Hang);
        self
    }

    pub fn fail_cancellation(&self, err: GenerationError) -> &Self {
        *locked(&self.cancel_error) = Some(err);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Prompts seen by `generate` and `create_batch`, in call order.
    pub fn prompts(&self) -> Vec<Prompt> {
        locked(&self.prompts).clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, GenerationError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.prompts).push(request.prompt().clone());
        let step = locked(&self.completions).pop_front();
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Hang) => std::future::pending().await,
            None => Err(GenerationError::Internal("completion script exhausted".into())),
        }
    }

    async fn create_batch(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<BatchHandle>, GenerationError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.prompts).push(request.prompt().clone());
        let step = locked(&self.submissions).pop_front();
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(Some(BatchHandle::new("batches/test"))),
        }
    }

    async fn get_batch(&self, _handle: &BatchHandle) -> Result<BatchStatus, GenerationError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let step = locked(&self.polls).pop_front();
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(BatchStatus::running()),
        }
    }

    async fn cancel_batch(&self, _handle: &BatchHandle) -> Result<(), GenerationError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        match locked(&self.cancel_error).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
