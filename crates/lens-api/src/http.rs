use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use lens_exec::{ContextKind, ContextStats};
use lens_model::{TaskId, TaskQuery, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{error::ApiError, handler::ApiHandler};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Routes:
    /// - POST /api/v1/tools/{name} - start an invocation
    /// - GET /api/v1/tasks - list tasks (`?tool=`, `?status=`, `?limit=`, `?offset=`)
    /// - GET /api/v1/tasks/{id} - task record
    /// - GET /api/v1/tasks/{id}/result - terminal result (409 while working)
    /// - POST /api/v1/tasks/{id}/cancel - request cancellation
    /// - PUT /api/v1/context/{kind} - cache a diff or file
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/tools/{name}", post(invoke_tool::<H>))
            .route("/api/v1/tasks", get(list_tasks::<H>))
            .route("/api/v1/tasks/{id}", get(get_task::<H>))
            .route("/api/v1/tasks/{id}/result", get(get_result::<H>))
            .route("/api/v1/tasks/{id}/cancel", post(cancel_task::<H>))
            .route("/api/v1/context/{kind}", put(put_context::<H>))
            .with_state(self.handler)
    }
}

#[derive(Debug, Default, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ListTasksParams {
    tool: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListTasksResponse {
    tasks: Vec<TaskRecord>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PutContextRequest {
    content: String,
    source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutContextResponse {
    kind: ContextKind,
    stats: ContextStats,
}

/// POST /api/v1/tools/{name}
///
/// The body is optional; `{"input": {...}}` carries the tool arguments.
async fn invoke_tool<H>(
    State(handler): State<Arc<H>>,
    Path(name): Path<String>,
    body: Option<Json<InvokeRequest>>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let Json(req) = body.unwrap_or_default();
    debug!(tool = %name, "invoking tool");
    let task_id = handler.invoke_tool(&name, req.input).await?;

    let response = InvokeResponse {
        task_id: task_id.to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/tasks
async fn list_tasks<H>(
    State(handler): State<Arc<H>>,
    Query(params): Query<ListTasksParams>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let mut query = TaskQuery::new();

    if let Some(tool) = params.tool {
        if tool.trim().is_empty() {
            return Err(ApiError::InvalidRequest("tool cannot be empty".into()));
        }
        query = query.with_tool(tool);
    }
    if let Some(status) = params.status {
        let status: TaskStatus = status.parse().map_err(ApiError::InvalidRequest)?;
        query = query.with_status(status);
    }
    if let Some(limit) = params.limit {
        query = query.with_limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.with_offset(offset);
    }

    let page = handler.list_tasks(query).await?;
    debug!(count = page.items.len(), total = page.total, "tasks listed");

    Ok(Json(ListTasksResponse {
        tasks: page.items,
        total: page.total,
    }))
}

/// GET /api/v1/tasks/{id}
async fn get_task<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let task_id = TaskId::from(id);
    handler
        .get_task(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::TaskNotFound(task_id.to_string()))
}

/// GET /api/v1/tasks/{id}/result
async fn get_result<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let task_id = TaskId::from(id);
    Ok(Json(handler.get_result(&task_id).await?))
}

/// POST /api/v1/tasks/{id}/cancel
async fn cancel_task<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    if id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("task id cannot be empty".into()));
    }
    let task_id = TaskId::from(id);
    handler.cancel_task(&task_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// PUT /api/v1/context/{kind}
async fn put_context<H>(
    State(handler): State<Arc<H>>,
    Path(kind): Path<String>,
    Json(req): Json<PutContextRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let kind: ContextKind = kind.parse().map_err(ApiError::InvalidRequest)?;
    let stats = handler.put_context(kind, req.content, req.source).await?;
    Ok(Json(PutContextResponse { kind, stats }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunnerApiAdapter;
    use axum::{body::Body, http::Request};
    use lens_core::{Dispatcher, LensConfig, TaskStore, testing::ScriptedUpstream};
    use lens_exec::{MemoryContextCache, ToolRegistry, ToolRunner};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(upstream: Arc<ScriptedUpstream>) -> Router {
        let config = LensConfig::default();
        let runner = ToolRunner::new(
            Dispatcher::builder(upstream, &config).build(),
            ToolRegistry::with_builtins(),
            Arc::new(MemoryContextCache::new(config.context_ttl())),
            TaskStore::new(),
            &config,
        );
        HttpApi::new(Arc::new(RunnerApiAdapter::new(runner))).router()
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn poll_result(app: &Router, id: &str) -> Value {
        let uri = format!("/api/v1/tasks/{id}/result");
        for _ in 0..200 {
            let (status, body) = call(app, "GET", &uri, None).await;
            if status == StatusCode::OK {
                return body;
            }
            assert_eq!(status, StatusCode::CONFLICT, "{body}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} never finished");
    }

    #[tokio::test]
    async fn put_context_then_invoke_completes() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_text(r#"{"summary":"Clean.","findings":[]}"#);
        let app = app(upstream);

        let (status, body) = call(
            &app,
            "PUT",
            "/api/v1/context/diff",
            Some(json!({"content": "+fn a() {}\n", "source": "git diff HEAD"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "diff");
        assert_eq!(body["stats"]["lines"], 1);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/tools/review_diff",
            Some(json!({"input": {"focus": "naming"}})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["taskId"].as_str().unwrap().to_string();

        let result = poll_result(&app, &id).await;
        assert_eq!(result["status"], "completed");
        assert_eq!(result["output"]["text"], "Clean.\n\nNo issues found.");

        let (status, record) = call(&app, "GET", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], "completed");

        let (status, list) = call(&app, "GET", "/api/v1/tasks?status=completed", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
    }

    #[tokio::test]
    async fn missing_context_fails_with_descriptor() {
        let app = app(Arc::new(ScriptedUpstream::new()));

        let (status, body) = call(&app, "POST", "/api/v1/tools/review_file", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["taskId"].as_str().unwrap().to_string();

        let result = poll_result(&app, &id).await;
        assert_eq!(result["status"], "failed");
        assert_eq!(result["error"]["code"], "E_NO_FILE");
        assert_eq!(result["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn error_statuses() {
        let app = app(Arc::new(ScriptedUpstream::new()));

        let (status, body) = call(&app, "POST", "/api/v1/tools/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "E_UNKNOWN_TOOL");

        let (status, _) = call(&app, "GET", "/api/v1/tasks/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/api/v1/tasks/ghost/result", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/api/v1/tasks?status=sleeping", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "PUT",
            "/api/v1/context/image",
            Some(json!({"content": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_over_http() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_hang();
        let app = app(upstream.clone());
        call(
            &app,
            "PUT",
            "/api/v1/context/diff",
            Some(json!({"content": "+x\n"})),
        )
        .await;

        let (_, body) = call(&app, "POST", "/api/v1/tools/review_diff", None).await;
        let id = body["taskId"].as_str().unwrap().to_string();
        while upstream.generate_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let (status, _) = call(&app, "POST", &format!("/api/v1/tasks/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let result = poll_result(&app, &id).await;
        assert_eq!(result["status"], "cancelled");
        assert_eq!(result["error"]["code"], "E_CANCELLED");
    }
}
