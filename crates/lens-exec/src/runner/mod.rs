//! Tool execution runner.
//!
//! ## Overview
//!
//! One invocation walks `Starting -> Validating -> BuildingPrompt -> CallingModel ->
//! ValidatingResponse -> Finalizing` and ends `completed`, `failed` or `cancelled`.
//! `ValidatingResponse` loops back to `CallingModel` while schema repairs remain.
//!
//! - The cached context is captured once, at `Starting`; validation and prompt building both
//!   read that snapshot.
//! - Only schema-class failures (unparsable, empty, or schema-violating responses) are repaired
//!   here; transient upstream failures were already retried by the dispatcher, everything else
//!   is terminal.
//! - Every failure leaves as an [`ErrorDescriptor`](lens_model::ErrorDescriptor) stored in the
//!   task record, and the terminal progress notification is always the last one.
mod progress;
mod repair;

pub use progress::{NoProgress, PROGRESS_TOTAL, ProgressReporter, Stage};
pub use repair::{REPAIR_ERROR_PREFIX, RepairState, RepairStep};

use std::{sync::Arc, time::Instant};

use lens_core::{Dispatcher, GenerationError, GenerationRequest, LensConfig, TaskStore};
use lens_model::{TaskId, TaskResult, ToolOutput};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    context::{CachedContext, ContextCache},
    error::{ToolError, ToolResult},
    tool::{Tool, ToolRegistry},
};
use progress::ProgressTracker;
use repair::OutputContract;

/// Limits applied by the runner itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// Re-prompts after a schema-class failure.
    pub max_repair_attempts: u32,
    /// Length cap of the validation error echoed in a repair prompt.
    pub repair_error_max_chars: usize,
    /// Size budget of the cached context a tool consumes.
    pub max_context_bytes: u64,
}

impl From<&LensConfig> for RunnerSettings {
    fn from(cfg: &LensConfig) -> Self {
        Self {
            max_repair_attempts: u32::try_from(cfg.max_repair_attempts).unwrap_or(u32::MAX),
            repair_error_max_chars: usize::try_from(cfg.repair_error_max_chars)
                .unwrap_or(usize::MAX),
            max_context_bytes: cfg.max_context_bytes,
        }
    }
}

#[derive(Clone)]
pub struct ToolRunner {
    dispatcher: Dispatcher,
    registry: Arc<ToolRegistry>,
    cache: Arc<dyn ContextCache>,
    store: TaskStore,
    config: Arc<LensConfig>,
    settings: RunnerSettings,
}

impl ToolRunner {
    pub fn new(
        dispatcher: Dispatcher,
        registry: ToolRegistry,
        cache: Arc<dyn ContextCache>,
        store: TaskStore,
        config: &LensConfig,
    ) -> Self {
        Self {
            dispatcher,
            registry: Arc::new(registry),
            cache,
            store,
            settings: RunnerSettings::from(config),
            config: Arc::new(config.clone()),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ContextCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers a `working` task. Unknown tools are rejected before any record exists.
    pub fn create_task(&self, tool: &str) -> ToolResult<TaskId> {
        let tool = self.registry.resolve(tool)?;
        Ok(self.store.create_task(tool.name()))
    }

    /// Creates a task and runs it to completion.
    pub async fn invoke(
        &self,
        tool: &str,
        input: Value,
        cancel: CancellationToken,
        reporter: Arc<dyn ProgressReporter>,
    ) -> ToolResult<(TaskId, TaskResult)> {
        let id = self.create_task(tool)?;
        let result = self.run(&id, tool, input, cancel, reporter).await;
        Ok((id, result))
    }

    /// Runs a task created by [`ToolRunner::create_task`] and persists its terminal result.
    pub async fn run(
        &self,
        task: &TaskId,
        tool: &str,
        input: Value,
        cancel: CancellationToken,
        reporter: Arc<dyn ProgressReporter>,
    ) -> TaskResult {
        let started = Instant::now();
        let mut tracker = ProgressTracker::new(task.clone(), self.store.clone(), reporter);

        let (result, message) = match self.execute(&mut tracker, tool, &input, &cancel).await {
            Ok(output) => (TaskResult::Completed { output }, "completed".to_string()),
            Err(err) => {
                let descriptor = err.to_descriptor();
                let message = descriptor.to_string();
                (TaskResult::from_error(descriptor), message)
            }
        };

        tracker.finish(message);
        if let Err(e) = self.store.store_result(task, result.clone()) {
            warn!(task = %task, error = %e, "terminal result not stored");
        }

        let error = result.error();
        info!(
            task = %task,
            tool,
            status = result.status().as_str(),
            code = error.map(|e| e.code.as_str()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "invocation finished"
        );
        result
    }

    async fn execute(
        &self,
        tracker: &mut ProgressTracker,
        name: &str,
        input: &Value,
        cancel: &CancellationToken,
    ) -> ToolResult<ToolOutput> {
        tracker.enter(Stage::Starting);
        let tool = self.registry.resolve(name)?;
        let snapshot = tool
            .prerequisite()
            .and_then(|kind| self.cache.get(kind))
            .filter(|ctx| !ctx.content.trim().is_empty());

        tracker.enter(Stage::Validating);
        checkpoint(cancel)?;
        self.validate(tool.as_ref(), snapshot.as_ref(), input)?;

        tracker.enter(Stage::BuildingPrompt);
        checkpoint(cancel)?;
        let prompt = tool.build_prompt(input, snapshot.as_ref())?;
        let schema = tool.output_schema();
        let contract = OutputContract::compile(tool.name(), &schema)?;

        let mut params = self.config.generation_params(tool.mode(input));
        params.property_ordering = tool.property_ordering();
        let request = GenerationRequest::new(prompt, schema, params, cancel.clone())
            .with_origin(tool.name());

        let value = self.call_with_repair(tracker, request, &contract).await?;

        tracker.enter(Stage::Finalizing);
        checkpoint(cancel)?;
        let structured = tool.transform(value);
        let text = tool.format(&structured);
        Ok(ToolOutput { structured, text })
    }

    fn validate(
        &self,
        tool: &dyn Tool,
        snapshot: Option<&CachedContext>,
        input: &Value,
    ) -> ToolResult<()> {
        if let Some(kind) = tool.prerequisite() {
            let ctx = snapshot.ok_or(ToolError::MissingContext(kind))?;
            let provided = ctx.stats.bytes as u64;
            let allowed = self.settings.max_context_bytes;
            if provided > allowed {
                return Err(ToolError::Budget {
                    kind,
                    provided,
                    allowed,
                });
            }
        }
        tool.validate_input(input)
    }

    /// Dispatch, then check the response against the contract; re-prompt on schema failures.
    async fn call_with_repair(
        &self,
        tracker: &mut ProgressTracker,
        mut request: GenerationRequest,
        contract: &OutputContract,
    ) -> ToolResult<Value> {
        let mut repair = RepairState::new(request.prompt().clone());
        loop {
            tracker.enter(Stage::CallingModel);
            let outcome = self.dispatcher.dispatch(&request).await;
            tracker.enter(Stage::ValidatingResponse);

            let failure = match outcome {
                Ok(value) => match contract.check(&value) {
                    Ok(()) => return Ok(value),
                    Err(violations) => violations,
                },
                Err(e) if e.is_schema_class() => e.to_string(),
                Err(e) => return Err(e.into()),
            };

            match repair.after_failure(failure, self.settings.max_repair_attempts) {
                RepairStep::Repair(next) => {
                    warn!(
                        origin = request.origin(),
                        repair = next.attempt(),
                        error = next.last_error().unwrap_or_default(),
                        "response failed the output schema; re-prompting"
                    );
                    tracker.note(format!("repairing response (attempt {})", next.attempt()));
                    request = request.with_prompt(next.prompt(self.settings.repair_error_max_chars));
                    repair = next;
                }
                RepairStep::Exhausted(last) => return Err(ToolError::SchemaInvalid(last)),
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> ToolResult<()> {
    if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextKind, MemoryContextCache};
    use lens_core::testing::ScriptedUpstream;
    use lens_model::{ErrorKind, Progress, TaskStatus};
    use serde_json::json;
    use std::{sync::Mutex, time::Duration};

    const DIFF: &str = "diff --git a/src/lib.rs b/src/lib.rs\n+pub fn f(v: &[u8]) -> u8 { v[3] }\n";
    const VALID: &str = r#"{"summary":"One risk.","findings":[{"file":"src/lib.rs","line":1,"severity":"high","message":"unchecked index"}]}"#;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Progress>>);

    impl ProgressReporter for Collect {
        fn report(&self, _task: &TaskId, p: &Progress) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(p.clone());
            Ok(())
        }
    }

    struct Harness {
        upstream: Arc<ScriptedUpstream>,
        runner: ToolRunner,
    }

    fn harness(config: LensConfig, diff: Option<&str>) -> Harness {
        let upstream = Arc::new(ScriptedUpstream::new());
        let dispatcher = Dispatcher::builder(upstream.clone(), &config).build();
        let cache = Arc::new(MemoryContextCache::new(config.context_ttl()));
        if let Some(diff) = diff {
            cache.put(CachedContext::new(ContextKind::Diff, diff));
        }
        let runner = ToolRunner::new(
            dispatcher,
            ToolRegistry::with_builtins(),
            cache,
            TaskStore::new(),
            &config,
        );
        Harness { upstream, runner }
    }

    fn config() -> LensConfig {
        LensConfig {
            max_repair_attempts: 2,
            repair_error_max_chars: 1_000,
            max_context_bytes: 10_000,
            ..LensConfig::default()
        }
    }

    async fn invoke(h: &Harness, input: Value) -> (TaskId, TaskResult) {
        h.runner
            .invoke("review_diff", input, CancellationToken::new(), Arc::new(NoProgress))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_diff_fails_validation_without_upstream_calls() {
        let h = harness(config(), None);
        let (id, result) = invoke(&h, json!({})).await;

        let err = result.error().unwrap();
        assert_eq!(err.code, "E_NO_DIFF");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(h.upstream.generate_calls(), 0);

        let record = h.runner.store().get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn completes_with_transformed_and_formatted_output() {
        let h = harness(config(), Some(DIFF));
        h.upstream.push_text(VALID);

        let (id, result) = invoke(&h, json!({"focus": "bounds"})).await;

        let TaskResult::Completed { output } = result else {
            panic!("expected completion, got {result:?}");
        };
        assert_eq!(output.structured["findings"][0]["severity"], "high");
        assert!(output.text.contains("src/lib.rs:1 unchecked index"));
        assert_eq!(h.upstream.generate_calls(), 1);
        assert!(h.upstream.prompts()[0].user.contains(DIFF));
        assert_eq!(h.runner.store().get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn schema_repair_succeeds_on_second_call() {
        let h = harness(config(), Some(DIFF));
        h.upstream
            .push_text(r#"{"summary": 5, "findings": []}"#)
            .push_text(VALID);

        let (_, result) = invoke(&h, json!({})).await;

        assert_eq!(result.status(), TaskStatus::Completed);
        assert_eq!(h.upstream.generate_calls(), 2);
        let second = &h.upstream.prompts()[1].user;
        assert!(second.contains(REPAIR_ERROR_PREFIX));
        assert!(second.contains("string"), "{second}");
        assert!(second.contains(DIFF));
    }

    #[tokio::test]
    async fn repair_prompt_truncates_error_text() {
        let cfg = LensConfig {
            repair_error_max_chars: 12,
            ..config()
        };
        let h = harness(cfg, Some(DIFF));
        h.upstream.push_text("not json at all").push_text(VALID);

        let (_, result) = invoke(&h, json!({})).await;
        assert_eq!(result.status(), TaskStatus::Completed);

        let second = &h.upstream.prompts()[1].user;
        let line = second
            .lines()
            .find_map(|l| l.strip_prefix(REPAIR_ERROR_PREFIX))
            .expect("repair prompt names the error");
        assert!(line.chars().count() <= 12 + "...".len(), "{line}");
    }

    #[tokio::test]
    async fn exhausted_repairs_surface_schema_error() {
        let h = harness(config(), Some(DIFF));
        for _ in 0..3 {
            h.upstream.push_text(r#"{"summary": "missing findings"}"#);
        }

        let (_, result) = invoke(&h, json!({})).await;

        let err = result.error().unwrap();
        assert_eq!(err.code, "E_SCHEMA_INVALID");
        assert_eq!(result.status(), TaskStatus::Failed);
        assert_eq!(h.upstream.generate_calls(), 3);
    }

    #[tokio::test]
    async fn progress_starts_at_zero_and_ends_at_total() {
        let h = harness(config(), Some(DIFF));
        h.upstream.push_text("{}").push_text(VALID);
        let sink = Arc::new(Collect::default());

        h.runner
            .invoke("review_diff", json!({}), CancellationToken::new(), sink.clone())
            .await
            .unwrap();

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.first().map(|p| (p.current, p.total)), Some((0, PROGRESS_TOTAL)));
        assert_eq!(
            seen.last().map(|p| (p.current, p.total)),
            Some((PROGRESS_TOTAL, PROGRESS_TOTAL))
        );
        assert!(seen.windows(2).all(|w| w[0].current <= w[1].current));
        assert_eq!(seen.iter().filter(|p| p.is_done()).count(), 1);
    }

    #[tokio::test]
    async fn oversized_context_is_a_budget_failure() {
        let cfg = LensConfig {
            max_context_bytes: 16,
            ..config()
        };
        let h = harness(cfg, Some(DIFF));

        let (_, result) = invoke(&h, json!({})).await;

        let err = result.error().unwrap();
        assert_eq!(err.code, "E_BUDGET_EXCEEDED");
        assert_eq!(err.kind, ErrorKind::Budget);
        assert_eq!(err.limit.map(|l| l.allowed), Some(16));
        assert_eq!(err.limit.map(|l| l.provided), Some(DIFF.len() as u64));
        assert_eq!(h.upstream.generate_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let h = harness(config(), Some(DIFF));
        let (_, result) = invoke(&h, json!({"focus": 42})).await;
        assert_eq!(result.error().unwrap().code, "E_INVALID_INPUT");
        assert_eq!(h.upstream.generate_calls(), 0);
    }

    #[tokio::test]
    async fn non_transient_upstream_failure_is_not_repaired() {
        let h = harness(config(), Some(DIFF));
        h.upstream.push_error(GenerationError::Upstream {
            status: Some(400),
            code: Some("INVALID_ARGUMENT".into()),
            message: "bad request".into(),
        });

        let (_, result) = invoke(&h, json!({})).await;

        assert_eq!(result.error().unwrap().code, "E_UPSTREAM");
        assert_eq!(h.upstream.generate_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_yields_cancelled_record() {
        let h = harness(config(), Some(DIFF));
        h.upstream.push_hang();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let (id, result) = h
            .runner
            .invoke("review_diff", json!({}), cancel, Arc::new(NoProgress))
            .await
            .unwrap();

        assert_eq!(result.status(), TaskStatus::Cancelled);
        assert_eq!(result.error().unwrap().code, "E_CANCELLED");
        assert_eq!(h.runner.store().get(&id).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(h.runner.dispatcher().interactive_pool().active(), 0);
    }

    #[test]
    fn unknown_tool_creates_no_task() {
        let h = harness(config(), None);
        assert_eq!(
            h.runner.create_task("format_disk").err(),
            Some(ToolError::UnknownTool("format_disk".into()))
        );
        assert!(h.runner.store().is_empty());
    }
}
