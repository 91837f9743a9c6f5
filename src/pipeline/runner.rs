//! Workflow execution engine
//!
//! Walks the step tree of a [`Workflow`] in declaration order. Leaf steps
//! call out to an [`ActionExecutor`], the script runner or the delay model;
//! `loop`, `foreach` and `condition` recurse into their bodies. The first
//! failing step aborts every enclosing sequence up to the root and the run
//! ends with a [`RunReport`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value as JsonValue;

use crate::action::{ActionExecutor, ActionParams, ActionResult};
use crate::delay::{parse_millis, DelayStrategy, DEFAULT_VARIANCE};
use crate::events::{Event, EventSink, NullSink};
use crate::scripting::{ScriptContext, ScriptRunner};
use crate::signals::CancelToken;
use super::context::{seed_inputs, RunContext, Variables};
use super::report::{FailedStep, LogEntry, LogLevel, RunReport};
use super::workflow::{
    is_truthy, ActionStep, ConditionStep, ForeachStep, LoopStep, RandomWaitStep, ScriptStep, Step,
    StepKind, WaitStep, Workflow, DEFAULT_RANDOM_MAX_MS, DEFAULT_RANDOM_MIN_MS,
};

/// Upper bound for a single `loop` step
pub const MAX_LOOP_ITERATIONS: i64 = 100_000;

/// Granularity at which long pauses notice cancellation
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Interpreter configuration
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// A failed script is recorded but does not fail its step
    pub continue_on_script_error: bool,
    /// Variance applied to post-action waits without their own
    pub wait_variance: f64,
    /// Upper bound for a single executor call
    pub action_timeout: Option<Duration>,
    /// Skip every pause (dry runs, tests)
    pub skip_waits: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            continue_on_script_error: true,
            wait_variance: DEFAULT_VARIANCE,
            action_timeout: None,
            skip_waits: false,
        }
    }
}

/// The step that actually failed, possibly deep inside a body.
#[derive(Debug, Clone)]
struct StepFailure {
    step_id: String,
    step_name: String,
    message: String,
}

impl StepFailure {
    fn new(step: &Step, message: impl Into<String>) -> Self {
        Self {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            message: message.into(),
        }
    }

    /// Message as seen from `root`: nested failures name the leaf.
    fn describe_from(&self, root: &Step) -> String {
        if self.step_id == root.id && self.step_name == root.name {
            self.message.clone()
        } else {
            format!("{}: {}", self.step_name, self.message)
        }
    }
}

#[derive(Debug)]
enum StepOutcome {
    Completed(Option<String>),
    Failed(StepFailure),
    Interrupted,
}

/// Mutable state of one run.
struct RunState {
    ctx: RunContext,
    logs: Vec<LogEntry>,
    step_delay: Option<u64>,
    continue_on_script_error: bool,
}

impl RunState {
    fn log(&mut self, level: LogLevel, step_id: Option<&str>, message: impl Into<String>) {
        let entry = LogEntry::new(level, step_id, message);
        let step = entry.step_id.as_deref().unwrap_or("-");
        match level {
            LogLevel::Debug => tracing::debug!(step, "{}", entry.message),
            LogLevel::Info => tracing::info!(step, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(step, "{}", entry.message),
            LogLevel::Error => tracing::error!(step, "{}", entry.message),
        }
        self.logs.push(entry);
    }
}

/// Tree-walking step interpreter
pub struct Interpreter {
    device: Arc<dyn ActionExecutor>,
    browser: Option<Arc<dyn ActionExecutor>>,
    scripts: ScriptRunner,
    events: Arc<dyn EventSink>,
    options: RunOptions,
    cancel: CancelToken,
}

impl Interpreter {
    pub fn new(device: Arc<dyn ActionExecutor>, scripts: ScriptRunner) -> Self {
        Self {
            device,
            browser: None,
            scripts,
            events: Arc::new(NullSink),
            options: RunOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn ActionExecutor>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run a complete workflow. Never fails: every problem ends up in the
    /// returned report.
    pub async fn run(&mut self, workflow: &Workflow, supplied: Variables, device_id: Option<String>) -> RunReport {
        let started = Instant::now();
        let inputs = seed_inputs(&workflow.inputs, &supplied);

        let mut state = RunState {
            ctx: RunContext::new(inputs, device_id.clone()),
            logs: Vec::new(),
            step_delay: workflow.step_delay,
            continue_on_script_error: workflow
                .continue_on_script_error
                .unwrap_or(self.options.continue_on_script_error),
        };

        self.events.emit(&Event::WorkflowStart {
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.display_name().to_string(),
            device_id,
            total_steps: workflow.steps.len(),
        });
        state.log(
            LogLevel::Info,
            None,
            format!("Starting workflow '{}' ({} steps)", workflow.display_name(), workflow.steps.len()),
        );

        let mut steps_executed = 0;
        let mut failed_step = None;
        let mut interrupted = false;

        for (index, step) in workflow.steps.iter().enumerate() {
            match self.run_step(step, &mut state, 0).await {
                StepOutcome::Completed(_) => steps_executed += 1,
                StepOutcome::Failed(failure) => {
                    steps_executed += 1;
                    let message = failure.describe_from(step);
                    state.log(
                        LogLevel::Error,
                        Some(&step.id),
                        format!("Step {} ({}) failed: {}", index + 1, step.name, message),
                    );
                    failed_step = Some(FailedStep {
                        index,
                        id: step.id.clone(),
                        name: step.name.clone(),
                        message,
                    });
                    break;
                }
                StepOutcome::Interrupted => {
                    interrupted = true;
                    state.log(LogLevel::Warn, None, format!("Run interrupted before step {}", index + 1));
                    break;
                }
            }
        }

        let success = failed_step.is_none() && !interrupted;
        let duration = started.elapsed();
        let steps_failed = usize::from(failed_step.is_some());

        state.log(
            if success { LogLevel::Info } else { LogLevel::Warn },
            None,
            format!(
                "Workflow '{}' finished: {} of {} steps executed",
                workflow.display_name(),
                steps_executed,
                workflow.steps.len()
            ),
        );
        self.events.emit(&Event::WorkflowComplete {
            workflow_id: workflow.id.clone(),
            success,
            steps_executed,
            steps_failed,
            duration_ms: duration.as_millis() as u64,
            interrupted,
        });

        // Declared outputs missing from the context are left out
        let outputs = workflow
            .outputs
            .iter()
            .filter_map(|name| state.ctx.get(name).map(|value| (name.clone(), value.clone())))
            .collect();

        RunReport {
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.display_name().to_string(),
            success,
            steps_executed,
            steps_failed,
            duration,
            context: state.ctx.snapshot(),
            outputs,
            failed_step,
            interrupted,
            logs: state.logs,
        }
    }

    fn run_steps<'a>(
        &'a mut self,
        steps: &'a [Step],
        state: &'a mut RunState,
        depth: usize,
    ) -> LocalBoxFuture<'a, StepOutcome> {
        async move {
            for step in steps {
                match self.run_step(step, state, depth).await {
                    StepOutcome::Completed(_) => {}
                    other => return other,
                }
            }
            StepOutcome::Completed(None)
        }
        .boxed_local()
    }

    fn run_step<'a>(&'a mut self, step: &'a Step, state: &'a mut RunState, depth: usize) -> LocalBoxFuture<'a, StepOutcome> {
        async move {
            if self.cancel.is_cancelled() {
                return StepOutcome::Interrupted;
            }

            self.events.emit(&Event::StepStart {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                kind: step.kind.type_name().to_string(),
                depth,
            });
            tracing::debug!(step = %step.id, kind = step.kind.type_name(), depth, "step start");

            let outcome = match &step.kind {
                StepKind::Action(action) => self.run_action(step, action, false, state).await,
                StepKind::BrowserAction(action) => self.run_action(step, action, true, state).await,
                StepKind::Wait(wait) => self.run_wait(step, wait, state).await,
                StepKind::RandomWait(wait) => self.run_random_wait(step, wait, state).await,
                StepKind::Script(script) => self.run_script(step, script, state).await,
                StepKind::Loop(lp) => self.run_loop(step, lp, state, depth).await,
                StepKind::Foreach(each) => self.run_foreach(step, each, state, depth).await,
                StepKind::Condition(cond) => self.run_condition(step, cond, state, depth).await,
                StepKind::Unknown(type_name) => {
                    state.log(
                        LogLevel::Warn,
                        Some(&step.id),
                        format!("Unknown step type '{}', skipping", type_name),
                    );
                    StepOutcome::Completed(Some(format!("Skipped unknown step type '{}'", type_name)))
                }
            };

            match &outcome {
                StepOutcome::Completed(message) => self.events.emit(&Event::StepComplete {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    message: message.clone(),
                }),
                StepOutcome::Failed(failure) => self.events.emit(&Event::StepFailed {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    error: failure.describe_from(step),
                }),
                StepOutcome::Interrupted => {}
            }

            outcome
        }
        .boxed_local()
    }

    async fn run_action(&mut self, step: &Step, action: &ActionStep, browser: bool, state: &mut RunState) -> StepOutcome {
        let name = state.ctx.resolve(action.action.as_str());
        let params: ActionParams = {
            let resolver = state.ctx.resolver();
            action
                .params
                .iter()
                .map(|(key, value)| (key.clone(), resolver.resolve_value(value)))
                .collect()
        };

        let executor = if browser {
            match &self.browser {
                Some(executor) => executor.clone(),
                None => {
                    return StepOutcome::Failed(StepFailure::new(
                        step,
                        format!("Cannot run browser action '{}': no browser executor configured", name),
                    ))
                }
            }
        } else {
            self.device.clone()
        };

        tracing::debug!(step = %step.id, executor = executor.name(), action = %name, ?params, "dispatching action");
        let result = match self.options.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, executor.execute(&name, &params)).await {
                Ok(result) => result,
                Err(_) => ActionResult::failed(format!(
                    "Action '{}' timed out after {:.1}s",
                    name,
                    limit.as_secs_f64()
                )),
            },
            None => executor.execute(&name, &params).await,
        };

        if let Some(target) = &action.save_to {
            state.ctx.set(target.clone(), result.to_context_value());
        }

        if !result.success {
            return StepOutcome::Failed(StepFailure::new(step, result.message));
        }
        state.log(LogLevel::Info, Some(&step.id), format!("{}: {}", name, result.message));

        let wait_ms = match &action.wait_after {
            Some(raw) => {
                let resolved = state.ctx.resolve(raw.as_str());
                let parsed = parse_millis(&resolved);
                if parsed.is_none() {
                    state.log(
                        LogLevel::Warn,
                        Some(&step.id),
                        format!("Invalid wait_after '{}', not waiting", resolved),
                    );
                }
                parsed
            }
            None => state.step_delay,
        };
        if let Some(ms) = wait_ms.filter(|ms| *ms > 0) {
            let variance = action.wait_variance.unwrap_or(self.options.wait_variance);
            let waited = self.pause(DelayStrategy::variance(ms as i64, variance)).await;
            tracing::debug!(step = %step.id, waited_ms = waited.as_millis() as u64, "post-action wait");
        }

        StepOutcome::Completed(Some(result.message))
    }

    async fn run_wait(&mut self, step: &Step, wait: &WaitStep, state: &mut RunState) -> StepOutcome {
        let resolved = state.ctx.resolve(wait.duration.as_str());
        let ms = parse_millis(&resolved).unwrap_or_else(|| {
            state.log(
                LogLevel::Warn,
                Some(&step.id),
                format!("Invalid wait duration '{}', using 0 ms", resolved),
            );
            0
        });

        let waited = self.pause(DelayStrategy::fixed(ms)).await;
        let message = format!("Waited {} ms", waited.as_millis());
        state.log(LogLevel::Info, Some(&step.id), message.clone());
        StepOutcome::Completed(Some(message))
    }

    async fn run_random_wait(&mut self, step: &Step, wait: &RandomWaitStep, state: &mut RunState) -> StepOutcome {
        let mut bound = |raw: &str, label: &str, default: u64| {
            let resolved = state.ctx.resolve(raw);
            parse_millis(&resolved).unwrap_or_else(|| {
                state.log(
                    LogLevel::Warn,
                    Some(&step.id),
                    format!("Invalid random_wait {} '{}', using {} ms", label, resolved, default),
                );
                default
            })
        };
        let min = bound(wait.min.as_str(), "min", DEFAULT_RANDOM_MIN_MS);
        let max = bound(wait.max.as_str(), "max", DEFAULT_RANDOM_MAX_MS);

        let waited = self.pause(DelayStrategy::range(min, max)).await;
        state.log(
            LogLevel::Info,
            Some(&step.id),
            format!("Random wait {} ms (range {}-{})", waited.as_millis(), min, max),
        );
        StepOutcome::Completed(Some(format!("Waited {} ms", waited.as_millis())))
    }

    async fn run_script(&mut self, step: &Step, script: &ScriptStep, state: &mut RunState) -> StepOutcome {
        let source = state.ctx.resolve(script.script.as_str());
        let ctx = ScriptContext::new(
            state.ctx.inputs().clone(),
            state.ctx.snapshot(),
            state.ctx.device_id().map(str::to_string),
        );

        let outcome = self.scripts.execute(&source, &ctx).await;

        for line in outcome.captured_output.lines().filter(|l| !l.trim().is_empty()) {
            state.log(LogLevel::Info, Some(&step.id), line);
        }
        if let Some(target) = &script.save_to {
            state.ctx.set(target.clone(), outcome.to_context_value());
        }

        if outcome.success {
            return StepOutcome::Completed(Some("Script completed".to_string()));
        }

        let error = outcome.error.unwrap_or_else(|| "script failed".to_string());
        if state.continue_on_script_error {
            state.log(LogLevel::Warn, Some(&step.id), format!("Script error (continuing): {}", error));
            StepOutcome::Completed(Some(format!("Script error: {}", error)))
        } else {
            StepOutcome::Failed(StepFailure::new(step, error))
        }
    }

    async fn run_loop(&mut self, step: &Step, lp: &LoopStep, state: &mut RunState, depth: usize) -> StepOutcome {
        let resolved = state.ctx.resolve(lp.count.as_str());
        let count = match parse_count(&resolved) {
            Some(count) => count,
            None => {
                return StepOutcome::Failed(StepFailure::new(
                    step,
                    format!("Invalid loop count '{}'", resolved),
                ))
            }
        };
        if count > MAX_LOOP_ITERATIONS {
            return StepOutcome::Failed(StepFailure::new(
                step,
                format!("Loop count {} exceeds the maximum of {}", count, MAX_LOOP_ITERATIONS),
            ));
        }

        for i in 0..count.max(0) {
            state.ctx.set(lp.variable.clone(), JsonValue::from(i));
            match self.run_steps(&lp.body, state, depth + 1).await {
                StepOutcome::Completed(_) => {}
                other => return other,
            }
        }

        StepOutcome::Completed(Some(format!("Completed {} iterations", count.max(0))))
    }

    async fn run_foreach(&mut self, step: &Step, each: &ForeachStep, state: &mut RunState, depth: usize) -> StepOutcome {
        let resolved = state.ctx.resolve(each.items.as_str());
        let items = split_items(&resolved);
        tracing::debug!(step = %step.id, count = items.len(), "foreach items");

        let total = items.len();
        for item in items {
            state.ctx.set(each.variable.clone(), item);
            match self.run_steps(&each.body, state, depth + 1).await {
                StepOutcome::Completed(_) => {}
                other => return other,
            }
        }

        StepOutcome::Completed(Some(format!("Processed {} items", total)))
    }

    async fn run_condition(&mut self, step: &Step, cond: &ConditionStep, state: &mut RunState, depth: usize) -> StepOutcome {
        let resolved = state.ctx.resolve(cond.condition.as_str());
        let taken = is_truthy(&resolved);
        state.log(
            LogLevel::Debug,
            Some(&step.id),
            format!("Condition '{}' is {}", resolved, taken),
        );

        let branch = if taken { &cond.then } else { &cond.else_steps };
        match self.run_steps(branch, state, depth + 1).await {
            StepOutcome::Completed(_) => StepOutcome::Completed(Some(format!(
                "Took {} branch",
                if taken { "then" } else { "else" }
            ))),
            other => other,
        }
    }

    /// Sleep for a sampled duration, waking early when the run is cancelled.
    async fn pause(&self, strategy: DelayStrategy) -> Duration {
        if self.options.skip_waits {
            return Duration::ZERO;
        }

        let total = strategy.sample();
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= total || self.cancel.is_cancelled() {
                return elapsed.min(total);
            }
            tokio::time::sleep((total - elapsed).min(PAUSE_SLICE)).await;
        }
    }
}

/// Integer loop count; fractional literals are truncated.
fn parse_count(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// A JSON array is taken as is; anything else is split on commas with
/// empty segments dropped.
fn split_items(text: &str) -> Vec<JsonValue> {
    if let Ok(JsonValue::Array(items)) = serde_json::from_str::<JsonValue>(text.trim()) {
        return items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(s) => JsonValue::String(s.trim().to_string()),
                other => other,
            })
            .collect();
    }

    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| JsonValue::String(s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DryRunExecutor;
    use crate::events::CollectingSink;
    use serde_json::json;

    fn interpreter() -> Interpreter {
        crate::logging::init_test();
        let scripts = ScriptRunner::in_process().unwrap();
        Interpreter::new(Arc::new(DryRunExecutor::device()), scripts)
            .with_options(RunOptions { skip_waits: true, ..RunOptions::default() })
    }

    fn workflow(steps: JsonValue) -> Workflow {
        Workflow::from_json(&json!({"id": "t", "name": "Test", "steps": steps}).to_string()).unwrap()
    }

    #[test]
    fn test_split_items() {
        assert_eq!(split_items(r#"["a", " b ", 3]"#), vec![json!("a"), json!("b"), json!(3)]);
        assert_eq!(split_items("x, y,,z "), vec![json!("x"), json!("y"), json!("z")]);
        assert!(split_items("").is_empty());
        assert!(split_items("[]").is_empty());
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 3 "), Some(3));
        assert_eq!(parse_count("2.9"), Some(2));
        assert_eq!(parse_count("-1"), Some(-1));
        assert_eq!(parse_count("{{n}}"), None);
    }

    #[test]
    fn test_failure_message_names_leaf() {
        let root = Step { id: "outer".into(), name: "Outer".into(), kind: StepKind::Unknown("x".into()) };
        let leaf = Step { id: "inner".into(), name: "Tap OK".into(), kind: StepKind::Unknown("x".into()) };

        assert_eq!(StepFailure::new(&root, "boom").describe_from(&root), "boom");
        assert_eq!(StepFailure::new(&leaf, "boom").describe_from(&root), "Tap OK: boom");
    }

    #[tokio::test]
    async fn test_loop_binds_index() {
        let wf = workflow(json!([
            {"id": "l", "type": "loop", "count": 3, "variable": "n", "body": [
                {"id": "s", "type": "python", "script": "flow::set_result_str(\"last\", \"{{n}}\");", "save_to": "r"}
            ]}
        ]));
        let report = interpreter().run(&wf, Variables::new(), None).await;

        assert!(report.success);
        assert_eq!(report.steps_executed, 1);
        assert_eq!(report.context["n"], json!(2));
        assert_eq!(report.context["r"], json!({"last": "2"}));
    }

    #[tokio::test]
    async fn test_unknown_step_is_a_no_op() {
        let wf = workflow(json!([{"id": "u", "type": "teleport"}, {"id": "w", "type": "wait", "duration": 5}]));
        let report = interpreter().run(&wf, Variables::new(), None).await;

        assert!(report.success);
        assert_eq!(report.steps_executed, 2);
        assert!(report.logs.iter().any(|l| l.level == LogLevel::Warn && l.message.contains("teleport")));
    }

    #[tokio::test]
    async fn test_events_follow_steps() {
        let sink = Arc::new(CollectingSink::new());
        let wf = workflow(json!([
            {"id": "a", "type": "action", "action": "home"},
            {"id": "b", "type": "action", "action": "fly"}
        ]));
        let mut interpreter = interpreter().with_events(sink.clone());
        let report = interpreter.run(&wf, Variables::new(), Some("dev".into())).await;

        assert!(!report.success);
        let names: Vec<String> = sink
            .events()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["workflow_start", "step_start", "step_complete", "step_start", "step_failed", "workflow_complete"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let wf = workflow(json!([{"id": "a", "type": "action", "action": "home"}]));
        let mut interpreter = interpreter();
        interpreter.cancel_token().cancel();
        let report = interpreter.run(&wf, Variables::new(), None).await;

        assert!(report.interrupted);
        assert!(!report.success);
        assert_eq!(report.steps_executed, 0);
        assert!(report.failed_step.is_none());
    }

    #[tokio::test]
    async fn test_loop_count_over_limit_fails() {
        let wf = workflow(json!([{"id": "l", "type": "loop", "count": MAX_LOOP_ITERATIONS + 1, "body": []}]));
        let report = interpreter().run(&wf, Variables::new(), None).await;

        assert!(!report.success);
        assert!(report.failed_step.unwrap().message.contains("exceeds"));
    }
}
