//! Rune runtime and script engine
//!
//! One [`ScriptEngine`] owns a Rune context with the stepflow host modules
//! installed and the session those modules write into. Stdio is not part
//! of the context, so a snippet can only talk to the outside world through
//! `console`, `request` and the sandboxed `fs` module.

use once_cell::sync::Lazy;
use regex::Regex;
use rune::runtime::{RuntimeContext, Value};
use rune::termcolor::Buffer;
use rune::{Context, Diagnostics, Options, Source, Sources, Unit, Vm};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::sync::Arc;

use super::context::{new_session, with_session, ScriptContext, ScriptOutcome, SessionState, SharedSession};
use super::modules;
use crate::errors::{Result, StepflowError};

static MAIN_FN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(pub\s+)?fn\s+main\s*\(").unwrap());

/// VM instructions one snippet may execute before it is stopped
pub const DEFAULT_INSTRUCTION_BUDGET: usize = 50_000_000;

/// The script engine powered by Rune
pub struct ScriptEngine {
    context: Context,
    runtime: Arc<RuntimeContext>,
    session: SharedSession,
    budget: usize,
}

impl ScriptEngine {
    /// Create an engine with every host module installed
    pub fn new() -> Result<Self> {
        let session = new_session();

        let mut context = Context::with_config(false)
            .map_err(|e| StepflowError::Script(format!("Failed to create context: {}", e)))?;
        Self::install_modules(&mut context, &session)?;

        let runtime = Arc::new(
            context
                .runtime()
                .map_err(|e| StepflowError::Script(format!("Failed to create runtime: {}", e)))?,
        );

        Ok(Self { context, runtime, session, budget: DEFAULT_INSTRUCTION_BUDGET })
    }

    /// Cap the instructions a single `execute` may run
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget.max(1);
        self
    }

    fn install_modules(context: &mut Context, session: &SharedSession) -> Result<()> {
        let installs = [
            ("json", rune_modules::json::module(true)),
            ("flow", modules::flow::module(session)),
            ("console", modules::console::module(session)),
            ("request", modules::request::module()),
            ("fs", modules::fs::module()),
            ("num", modules::num::module()),
            ("system", modules::system::module()),
        ];

        for (name, module) in installs {
            let module = module.map_err(|e| StepflowError::Script(format!("{} module: {}", name, e)))?;
            context
                .install(module)
                .map_err(|e| StepflowError::Script(format!("Failed to install {}: {}", name, e)))?;
        }

        Ok(())
    }

    /// Compile a script without executing it. The error is the first
    /// diagnostic line.
    pub fn compile(&self, source: &str) -> std::result::Result<Arc<Unit>, String> {
        let mut sources = Sources::new();
        let source = Source::memory(source).map_err(|e| format!("Source error: {}", e))?;
        sources.insert(source).map_err(|e| format!("Source error: {}", e))?;

        let mut diagnostics = Diagnostics::new();
        let options = Options::default();

        let result = rune::prepare(&mut sources)
            .with_context(&self.context)
            .with_options(&options)
            .with_diagnostics(&mut diagnostics)
            .build();

        match result {
            Ok(unit) => Ok(Arc::new(unit)),
            Err(e) => {
                let mut buffer = Buffer::no_color();
                let _ = diagnostics.emit(&mut buffer, &sources);
                let rendered = String::from_utf8_lossy(buffer.as_slice()).to_string();
                Err(first_diagnostic(&rendered).unwrap_or_else(|| e.to_string()))
            }
        }
    }

    /// Run `source` against `ctx`. Compile and runtime faults come back as a
    /// failed [`ScriptOutcome`], together with the output captured so far.
    pub async fn execute(&mut self, source: &str, ctx: &ScriptContext) -> ScriptOutcome {
        with_session(&self.session, |state| {
            *state = SessionState {
                inputs: ctx.inputs.clone(),
                context: ctx.context.clone(),
                device_id: ctx.device_id.clone().unwrap_or_default(),
                ..SessionState::default()
            };
        });

        let source = wrap_source(source);
        let unit = match self.compile(&source) {
            Ok(unit) => unit,
            Err(e) => {
                tracing::debug!(error = %e, "script failed to compile");
                return ScriptOutcome::failed(format!("CompileError: {}", e), self.take_output());
            }
        };

        // Host functions block (HTTP, sleeps), so the VM gets its own thread
        let runtime = self.runtime.clone();
        let budget = self.budget;
        let returned = match tokio::task::spawn_blocking(move || call_main(runtime, unit, budget)).await {
            Ok(returned) => returned,
            Err(e) => Err(format!("script thread failed: {}", e)),
        };

        let (result, output) = with_session(&self.session, |state| {
            (std::mem::take(&mut state.result), std::mem::take(&mut state.output))
        });

        match returned {
            Ok(value) => {
                let result = if result.is_empty() { value } else { JsonValue::Object(result) };
                ScriptOutcome::succeeded(result, output)
            }
            Err(e) => {
                tracing::debug!(error = %e, "script failed at runtime");
                ScriptOutcome::failed(format!("RuntimeError: {}", e), output)
            }
        }
    }

    fn take_output(&self) -> String {
        with_session(&self.session, |state| std::mem::take(&mut state.output))
    }
}

/// Snippets without a `main` become its body.
pub fn wrap_source(source: &str) -> Cow<'_, str> {
    if MAIN_FN.is_match(source) {
        Cow::Borrowed(source)
    } else {
        Cow::Owned(format!("pub fn main() {{\n{}\n}}", source))
    }
}

fn call_main(runtime: Arc<RuntimeContext>, unit: Arc<Unit>, budget: usize) -> std::result::Result<JsonValue, String> {
    let mut vm = Vm::new(runtime, unit);
    // The budget is thread-local, so it must be installed on the VM's thread
    let output = rune::runtime::budget::with(budget, || vm.call(rune::Hash::type_hash(["main"]), ()))
        .call()
        .map_err(|e| e.to_string())?;

    // `main` ending in `?` hands back a Result
    if let Ok(result) = rune::from_value::<std::result::Result<Value, Value>>(output.clone()) {
        return match result {
            Ok(value) => Ok(value_to_json(&value)),
            Err(error) => Err(describe_value(&error)),
        };
    }

    Ok(value_to_json(&output))
}

fn value_to_json(value: &Value) -> JsonValue {
    serde_json::to_value(value).unwrap_or_else(|_| JsonValue::String(format!("{:?}", value)))
}

fn describe_value(value: &Value) -> String {
    match value_to_json(value) {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

/// First `error: ...` line of rendered diagnostics.
fn first_diagnostic(rendered: &str) -> Option<String> {
    rendered
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("error"))
        .map(|line| {
            line.trim_start_matches("error")
                .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
                .to_string()
        })
        .filter(|line| !line.is_empty())
}
