use async_trait::async_trait;
use lens_exec::{ContextKind, ContextStats};
use lens_model::{TaskId, TaskPage, TaskQuery, TaskRecord, TaskResult};
use serde_json::Value;

use crate::error::ApiError;

/// Tool server API handler.
///
/// Transports ([`HttpApi`](crate::HttpApi)) talk to this trait only; wrap
/// [`RunnerApiAdapter`](crate::RunnerApiAdapter) to add auth or rate limiting.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    /// Starts an invocation in the background and returns its task id immediately.
    async fn invoke_tool(&self, tool: &str, input: Value) -> Result<TaskId, ApiError>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, ApiError>;

    /// Terminal result; [`ApiError::ResultPending`] while the task is still working.
    async fn get_result(&self, id: &TaskId) -> Result<TaskResult, ApiError>;

    /// Requests cancellation. A task that already finished is left untouched.
    async fn cancel_task(&self, id: &TaskId) -> Result<(), ApiError>;

    async fn list_tasks(&self, query: TaskQuery) -> Result<TaskPage<TaskRecord>, ApiError>;

    /// Replaces the cached context of `kind`.
    async fn put_context(
        &self,
        kind: ContextKind,
        content: String,
        source: Option<String>,
    ) -> Result<ContextStats, ApiError>;
}
