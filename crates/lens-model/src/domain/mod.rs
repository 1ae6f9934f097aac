mod task_id;
pub use task_id::TaskId;

mod task_status;
pub use task_status::TaskStatus;

mod task_record;
pub use task_record::{TaskRecord, TaskResult, ToolOutput};

mod task_query;
pub use task_query::{TaskPage, TaskQuery};

mod progress;
pub use progress::Progress;

mod error;
pub use error::{ErrorDescriptor, ErrorKind, SizeLimit};

mod generation;
pub use generation::{ExecutionMode, GenerationParams, Prompt, UsageMetadata};

/// Name of a registered tool.
pub type ToolName = String;

/// Timeout value in milliseconds.
pub type TimeoutMs = u64;
