use jsonschema::Validator;
use lens_model::Prompt;
use serde_json::Value;

use crate::error::{ToolError, ToolResult};

/// Marker line preceding the echoed validation error in an amended prompt.
pub const REPAIR_ERROR_PREFIX: &str = "Validation error: ";

/// Compiled output contract of one tool.
pub(crate) struct OutputContract {
    validator: Validator,
}

impl OutputContract {
    pub(crate) fn compile(tool: &str, schema: &Value) -> ToolResult<Self> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            ToolError::Internal(format!("output schema of {tool} does not compile: {e}"))
        })?;
        Ok(Self { validator })
    }

    /// All violations joined into one line, or `Ok` when the value conforms.
    pub(crate) fn check(&self, value: &Value) -> Result<(), String> {
        let issues: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues.join("; "))
        }
    }
}

/// Progress of the schema-repair loop of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairState {
    original: Prompt,
    attempt: u32,
    last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairStep {
    /// Call the model again with [`RepairState::prompt`].
    Repair(RepairState),
    /// Repair ceiling reached; carries the last schema error.
    Exhausted(String),
}

impl RepairState {
    pub fn new(original: Prompt) -> Self {
        Self {
            original,
            attempt: 0,
            last_error: None,
        }
    }

    /// Repairs issued so far.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn after_failure(self, error: String, max_repairs: u32) -> RepairStep {
        if self.attempt >= max_repairs {
            return RepairStep::Exhausted(error);
        }
        RepairStep::Repair(RepairState {
            attempt: self.attempt + 1,
            last_error: Some(error),
            original: self.original,
        })
    }

    /// Prompt for the next call: the original one, or an amended one after a failure.
    pub fn prompt(&self, max_error_chars: usize) -> Prompt {
        let Some(error) = &self.last_error else {
            return self.original.clone();
        };
        let user = format!(
            "Your previous response was rejected because it did not match the required JSON schema.\n\
             {REPAIR_ERROR_PREFIX}{}\n\
             Answer again with a single JSON value that satisfies the schema.\n\n{}",
            truncate_chars(error, max_error_chars),
            self.original.user
        );
        Prompt::new(self.original.system.clone(), user)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}
