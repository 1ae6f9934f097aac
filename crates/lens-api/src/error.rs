use lens_exec::ToolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {0} has not finished yet")]
    ResultPending(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ApiError {
    /// Stable code carried in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "E_INVALID_REQUEST",
            ApiError::TaskNotFound(_) => "E_NOT_FOUND",
            ApiError::ResultPending(_) => "E_PENDING",
            ApiError::Internal(_) => "E_INTERNAL",
            ApiError::Tool(ToolError::UnknownTool(_)) => "E_UNKNOWN_TOOL",
            ApiError::Tool(e) => e.code(),
        }
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ResultPending(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Tool(ToolError::UnknownTool(_)) => StatusCode::NOT_FOUND,
            ApiError::Tool(ToolError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Tool(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_exec::ContextKind;

    #[test]
    fn codes_follow_the_failing_layer() {
        assert_eq!(ApiError::TaskNotFound("t".into()).code(), "E_NOT_FOUND");
        assert_eq!(ApiError::ResultPending("t".into()).code(), "E_PENDING");
        assert_eq!(
            ApiError::Tool(ToolError::UnknownTool("nope".into())).code(),
            "E_UNKNOWN_TOOL"
        );
        assert_eq!(
            ApiError::from(ToolError::MissingContext(ContextKind::Diff)).code(),
            ContextKind::Diff.missing_code()
        );
    }

    #[cfg(feature = "http")]
    #[test]
    fn statuses_match_the_error_class() {
        use axum::{http::StatusCode, response::IntoResponse};

        let status = |e: ApiError| e.into_response().status();
        assert_eq!(status(ApiError::ResultPending("t".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(ApiError::Tool(ToolError::InvalidInput("x".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ApiError::Tool(ToolError::SchemaInvalid("x".into()))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(ApiError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
