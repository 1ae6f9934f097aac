use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ErrorDescriptor, Progress, TaskId, TaskStatus, ToolName};

/// Status and result of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique task identifier.
    pub id: TaskId,
    /// Tool that was invoked.
    pub tool: ToolName,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Latest human readable status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Latest progress notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// When the task was created.
    #[serde(with = "time_serde")]
    pub created_at: SystemTime,
    /// When the task was last updated.
    #[serde(with = "time_serde")]
    pub updated_at: SystemTime,
    /// Terminal result; set exactly once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

/// Terminal payload of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TaskResult {
    Completed { output: ToolOutput },
    Failed { error: ErrorDescriptor },
    Cancelled { error: ErrorDescriptor },
}

impl TaskResult {
    /// Builds the failure result matching the descriptor kind.
    ///
    /// A `cancelled` descriptor yields [`TaskResult::Cancelled`], anything else [`TaskResult::Failed`].
    pub fn from_error(error: ErrorDescriptor) -> Self {
        if error.kind == crate::ErrorKind::Cancelled {
            TaskResult::Cancelled { error }
        } else {
            TaskResult::Failed { error }
        }
    }

    /// Task status this result terminates in.
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskResult::Completed { .. } => TaskStatus::Completed,
            TaskResult::Failed { .. } => TaskStatus::Failed,
            TaskResult::Cancelled { .. } => TaskStatus::Cancelled,
        }
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match self {
            TaskResult::Completed { .. } => None,
            TaskResult::Failed { error } | TaskResult::Cancelled { error } => Some(error),
        }
    }
}

/// Successful tool output: the structured payload and its rendered form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub structured: Value,
    pub text: String,
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        (since_epoch.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn record(result: Option<TaskResult>) -> TaskRecord {
        TaskRecord {
            id: TaskId::from("task-1"),
            tool: "review_diff".to_string(),
            status: result.as_ref().map(|r| r.status()).unwrap_or(TaskStatus::Working),
            message: None,
            progress: Some(Progress::new(3, 10)),
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            result,
        }
    }

    #[test]
    fn cancelled_descriptor_yields_cancelled_result() {
        let err = ErrorDescriptor::new("E_CANCELLED", "withdrawn", ErrorKind::Cancelled);
        let result = TaskResult::from_error(err);
        assert_eq!(result.status(), TaskStatus::Cancelled);

        let err = ErrorDescriptor::new("E_NO_DIFF", "no diff cached", ErrorKind::Validation);
        let result = TaskResult::from_error(err);
        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(result.error().map(|e| e.code.as_str()), Some("E_NO_DIFF"));
    }

    #[test]
    fn working_record_omits_result() {
        let json = serde_json::to_string(&record(None)).unwrap();
        assert!(!json.contains("result"));
        assert!(json.contains(r#""status":"working""#));
    }

    #[test]
    fn completed_result_is_tagged() {
        let output = ToolOutput {
            structured: serde_json::json!({"summary": "ok"}),
            text: "ok".to_string(),
        };
        let json = serde_json::to_value(TaskResult::Completed { output }).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["output"]["structured"]["summary"], "ok");

        let rec = record(Some(TaskResult::from_error(ErrorDescriptor::new(
            "E_TIMEOUT",
            "slow",
            ErrorKind::Timeout,
        ))));
        let back: TaskRecord = serde_json::from_str(&serde_json::to_string(&rec).unwrap()).unwrap();
        assert_eq!(back.status, TaskStatus::Failed);
        assert_eq!(back.result, rec.result);
    }
}
