use std::fmt::Write as _;

use lens_model::Prompt;
use serde_json::{Value, json};

use super::Tool;
use crate::{
    context::{CachedContext, ContextKind},
    error::{ToolError, ToolResult},
};

const MAX_FOCUS_CHARS: usize = 2_000;
const SEVERITIES: [&str; 4] = ["critical", "high", "medium", "low"];

const DIFF_INSTRUCTION: &str = "You are a meticulous code reviewer. Review the unified diff \
supplied by the user. Report only concrete, actionable problems introduced or exposed by the \
change: bugs, security issues, race conditions, error-handling gaps, and clear maintainability \
hazards. Reference file paths and new-side line numbers from the diff. Respond with JSON only.";

const FILE_INSTRUCTION: &str = "You are a meticulous code reviewer. Review the single source \
file supplied by the user. Report concrete, actionable problems with their line numbers. \
Respond with JSON only.";

/// Shared input checks: an optional object with optional `focus` and `mode` strings.
fn validate_common(input: &Value) -> ToolResult<()> {
    let obj = match input {
        Value::Null => return Ok(()),
        Value::Object(obj) => obj,
        _ => return Err(ToolError::InvalidInput("input must be a JSON object".into())),
    };
    if let Some(focus) = obj.get("focus") {
        let focus = focus
            .as_str()
            .ok_or_else(|| ToolError::InvalidInput("`focus` must be a string".into()))?;
        if focus.chars().count() > MAX_FOCUS_CHARS {
            return Err(ToolError::InvalidInput(format!(
                "`focus` is longer than {MAX_FOCUS_CHARS} characters"
            )));
        }
    }
    if let Some(mode) = obj.get("mode") {
        match mode.as_str() {
            Some(m) if m.eq_ignore_ascii_case("batch") || m.eq_ignore_ascii_case("interactive") => {}
            _ => {
                return Err(ToolError::InvalidInput(
                    "`mode` must be \"interactive\" or \"batch\"".into(),
                ));
            }
        }
    }
    Ok(())
}

fn focus(input: &Value) -> Option<&str> {
    input
        .get("focus")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|f| !f.is_empty())
}

fn require(context: Option<&CachedContext>, kind: ContextKind) -> ToolResult<&CachedContext> {
    context.ok_or(ToolError::MissingContext(kind))
}

fn user_prompt(input: &Value, heading: &str, ctx: &CachedContext) -> String {
    let mut out = String::new();
    if let Some(focus) = focus(input) {
        let _ = writeln!(out, "Focus: {focus}\n");
    }
    if let Some(source) = &ctx.source {
        let _ = writeln!(out, "Source: {source}");
    }
    let _ = writeln!(
        out,
        "{heading} ({} files, {} lines):\n",
        ctx.stats.files, ctx.stats.lines
    );
    out.push_str(&ctx.content);
    out
}

fn severity_rank(v: &Value) -> usize {
    v.get("severity")
        .and_then(Value::as_str)
        .and_then(|s| SEVERITIES.iter().position(|x| *x == s))
        .unwrap_or(SEVERITIES.len())
}

/// Orders an array of findings by severity, keeping the model's order within a level.
fn sort_by_severity(mut output: Value, key: &str) -> Value {
    if let Some(items) = output.get_mut(key).and_then(Value::as_array_mut) {
        items.sort_by_key(severity_rank);
    }
    output
}

fn render(output: &Value, key: &str) -> String {
    let mut out = String::new();
    if let Some(summary) = output.get("summary").and_then(Value::as_str) {
        let _ = writeln!(out, "{summary}");
    }
    let items = output.get(key).and_then(Value::as_array);
    match items {
        Some(items) if !items.is_empty() => {
            out.push('\n');
            for item in items {
                let severity = item.get("severity").and_then(Value::as_str).unwrap_or("?");
                let message = item.get("message").and_then(Value::as_str).unwrap_or("");
                let file = item.get("file").and_then(Value::as_str);
                let line = item.get("line").and_then(Value::as_u64);
                let location = match (file, line) {
                    (Some(f), Some(l)) => format!("{f}:{l} "),
                    (Some(f), None) => format!("{f} "),
                    (None, Some(l)) => format!("line {l} "),
                    (None, None) => String::new(),
                };
                let _ = writeln!(out, "- [{severity}] {location}{message}");
            }
        }
        _ => {
            let _ = writeln!(out, "\nNo issues found.");
        }
    }
    out.trim_end().to_string()
}

/// Reviews the cached unified diff.
pub struct ReviewDiff;

impl Tool for ReviewDiff {
    fn name(&self) -> &'static str {
        "review_diff"
    }

    fn description(&self) -> &'static str {
        "Review the cached diff and report findings"
    }

    fn prerequisite(&self) -> Option<ContextKind> {
        Some(ContextKind::Diff)
    }

    fn validate_input(&self, input: &Value) -> ToolResult<()> {
        validate_common(input)
    }

    fn build_prompt(&self, input: &Value, context: Option<&CachedContext>) -> ToolResult<Prompt> {
        let ctx = require(context, ContextKind::Diff)?;
        Ok(Prompt::new(
            DIFF_INSTRUCTION,
            user_prompt(input, "Unified diff", ctx),
        ))
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "findings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file": {"type": "string"},
                            "line": {"type": "integer"},
                            "severity": {"type": "string", "enum": SEVERITIES},
                            "message": {"type": "string"}
                        },
                        "required": ["file", "severity", "message"]
                    }
                }
            },
            "required": ["summary", "findings"]
        })
    }

    fn property_ordering(&self) -> Option<Vec<String>> {
        Some(vec!["summary".into(), "findings".into()])
    }

    fn transform(&self, output: Value) -> Value {
        sort_by_severity(output, "findings")
    }

    fn format(&self, output: &Value) -> String {
        render(output, "findings")
    }
}

/// Reviews the cached single file.
pub struct ReviewFile;

impl Tool for ReviewFile {
    fn name(&self) -> &'static str {
        "review_file"
    }

    fn description(&self) -> &'static str {
        "Review the cached file and report issues"
    }

    fn prerequisite(&self) -> Option<ContextKind> {
        Some(ContextKind::File)
    }

    fn validate_input(&self, input: &Value) -> ToolResult<()> {
        validate_common(input)
    }

    fn build_prompt(&self, input: &Value, context: Option<&CachedContext>) -> ToolResult<Prompt> {
        let ctx = require(context, ContextKind::File)?;
        Ok(Prompt::new(
            FILE_INSTRUCTION,
            user_prompt(input, "Source file", ctx),
        ))
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "issues": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "line": {"type": "integer"},
                            "severity": {"type": "string", "enum": SEVERITIES},
                            "message": {"type": "string"}
                        },
                        "required": ["severity", "message"]
                    }
                }
            },
            "required": ["summary", "issues"]
        })
    }

    fn property_ordering(&self) -> Option<Vec<String>> {
        Some(vec!["summary".into(), "issues".into()])
    }

    fn transform(&self, output: Value) -> Value {
        sort_by_severity(output, "issues")
    }

    fn format(&self, output: &Value) -> String {
        render(output, "issues")
    }
}
