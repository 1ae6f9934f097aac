use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use lens_exec::{CachedContext, ContextKind, ContextStats, NoProgress, ToolRunner};
use lens_model::{TaskId, TaskPage, TaskQuery, TaskRecord, TaskResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::handler::ApiHandler;

type Inflight = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

/// [`ApiHandler`] backed by a [`ToolRunner`].
///
/// Every invocation runs on its own tokio task with a child token of the adapter's shutdown
/// token, so [`RunnerApiAdapter::shutdown`] cancels all of them at once.
#[derive(Clone)]
pub struct RunnerApiAdapter {
    runner: ToolRunner,
    inflight: Inflight,
    shutdown: CancellationToken,
}

impl RunnerApiAdapter {
    pub fn new(runner: ToolRunner) -> Self {
        Self::with_shutdown(runner, CancellationToken::new())
    }

    pub fn with_shutdown(runner: ToolRunner, shutdown: CancellationToken) -> Self {
        Self {
            runner,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    pub fn runner(&self) -> &ToolRunner {
        &self.runner
    }

    /// Invocations still running.
    pub fn inflight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancels every in-flight invocation.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ApiHandler for RunnerApiAdapter {
    async fn invoke_tool(&self, tool: &str, input: Value) -> Result<TaskId, ApiError> {
        if self.shutdown.is_cancelled() {
            return Err(ApiError::Internal("server is shutting down".into()));
        }
        let id = self.runner.create_task(tool)?;
        let cancel = self.shutdown.child_token();
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), cancel.clone());

        let runner = self.runner.clone();
        let inflight = Arc::clone(&self.inflight);
        let task = id.clone();
        let tool = tool.to_string();
        tokio::spawn(async move {
            runner
                .run(&task, &tool, input, cancel, Arc::new(NoProgress))
                .await;
            inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task);
        });

        debug!(task = %id, "invocation started");
        Ok(id)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, ApiError> {
        Ok(self.runner.store().get(id))
    }

    async fn get_result(&self, id: &TaskId) -> Result<TaskResult, ApiError> {
        let record = self
            .runner
            .store()
            .get(id)
            .ok_or_else(|| ApiError::TaskNotFound(id.to_string()))?;
        record
            .result
            .ok_or_else(|| ApiError::ResultPending(id.to_string()))
    }

    async fn cancel_task(&self, id: &TaskId) -> Result<(), ApiError> {
        let record = self
            .runner
            .store()
            .get(id)
            .ok_or_else(|| ApiError::TaskNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            debug!(task = %id, status = record.status.as_str(), "cancel ignored; task finished");
            return Ok(());
        }

        let token = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        if let Some(token) = token {
            token.cancel();
            info!(task = %id, "cancellation requested");
        }
        Ok(())
    }

    async fn list_tasks(&self, query: TaskQuery) -> Result<TaskPage<TaskRecord>, ApiError> {
        Ok(self.runner.store().query(&query))
    }

    async fn put_context(
        &self,
        kind: ContextKind,
        content: String,
        source: Option<String>,
    ) -> Result<ContextStats, ApiError> {
        if content.trim().is_empty() {
            return Err(ApiError::InvalidRequest(format!("{kind} content is empty")));
        }
        let mut ctx = CachedContext::new(kind, content);
        if let Some(source) = source {
            ctx = ctx.with_source(source);
        }
        let stats = ctx.stats;
        self.runner.cache().put(ctx);
        info!(kind = %kind, bytes = stats.bytes, lines = stats.lines, "context cached");
        Ok(stats)
    }
}
