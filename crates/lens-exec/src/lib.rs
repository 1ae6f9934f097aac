//! Tool execution on top of `lens-core`: the context cache, tool definitions, the runner state
//! machine with its schema-repair loop, and the Gemini upstream adapter.
pub mod context;
pub use context::{CachedContext, ContextCache, ContextKind, ContextStats, MemoryContextCache};

mod error;
pub use error::{ToolError, ToolResult};

#[cfg(feature = "gemini")]
pub mod gemini;

pub mod runner;
pub use runner::{
    NoProgress, PROGRESS_TOTAL, ProgressReporter, REPAIR_ERROR_PREFIX, RepairState, RepairStep,
    RunnerSettings, Stage, ToolRunner,
};

pub mod tool;
pub use tool::{ReviewDiff, ReviewFile, Tool, ToolRegistry};

pub mod prelude {
    pub use crate::context::{CachedContext, ContextCache, ContextKind, MemoryContextCache};
    pub use crate::error::{ToolError, ToolResult};
    pub use crate::runner::{NoProgress, ProgressReporter, ToolRunner};
    pub use crate::tool::{Tool, ToolRegistry};
}
