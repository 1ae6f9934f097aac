mod review;
pub use review::{ReviewDiff, ReviewFile};

use std::{collections::BTreeMap, sync::Arc};

use lens_model::{ExecutionMode, Prompt};
use serde_json::Value;

use crate::{
    context::{CachedContext, ContextKind},
    error::{ToolError, ToolResult},
};

/// One structured-generation tool.
///
/// The runner calls, in order: [`Tool::prerequisite`], [`Tool::validate_input`],
/// [`Tool::build_prompt`], then [`Tool::transform`] and [`Tool::format`] on a schema-valid
/// response.
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Context that must be cached before the tool can run.
    fn prerequisite(&self) -> Option<ContextKind> {
        None
    }

    fn validate_input(&self, _input: &Value) -> ToolResult<()> {
        Ok(())
    }

    fn build_prompt(&self, input: &Value, context: Option<&CachedContext>) -> ToolResult<Prompt>;

    /// JSON schema every response must satisfy.
    fn output_schema(&self) -> Value;

    /// Deterministic key order requested from the model.
    fn property_ordering(&self) -> Option<Vec<String>> {
        None
    }

    /// `"mode": "batch"` in the input selects batch execution.
    fn mode(&self, input: &Value) -> ExecutionMode {
        match input.get("mode").and_then(Value::as_str) {
            Some(m) if m.eq_ignore_ascii_case("batch") => ExecutionMode::Batch,
            _ => ExecutionMode::Interactive,
        }
    }

    fn transform(&self, output: Value) -> Value {
        output
    }

    fn format(&self, output: &Value) -> String {
        serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string())
    }
}

/// Tools addressable by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `review_diff` and `review_file`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReviewDiff));
        registry.register(Arc::new(ReviewFile));
        registry
    }

    /// Adds a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name(), tool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> ToolResult<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
