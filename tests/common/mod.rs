//! Common test utilities for stepflow integration tests
//!
//! - A recording executor with scripted failures
//! - Workflow fixtures written to temp dirs
//! - Interpreter and CLI invocation helpers

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use stepflow::action::{ActionExecutor, ActionParams, ActionResult};
use stepflow::pipeline::{Interpreter, RunOptions, Workflow};
use stepflow::scripting::ScriptRunner;

/// Executor that records every call and fails the actions it is told to.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(String, ActionParams)>>,
    failing: Vec<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(actions: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<(String, ActionParams)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &str, params: &ActionParams) -> ActionResult {
        self.calls.lock().unwrap().push((action.to_string(), params.clone()));
        if self.failing.iter().any(|f| f == action) {
            ActionResult::failed(format!("{} refused", action))
        } else {
            ActionResult::ok(format!("{} done", action))
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Parse a workflow from a JSON literal.
pub fn workflow(doc: Value) -> Workflow {
    Workflow::from_json(&doc.to_string()).expect("workflow fixture should parse")
}

/// Interpreter over `executor` with an in-process script engine.
pub fn interpreter(executor: Arc<RecordingExecutor>, options: RunOptions) -> Interpreter {
    let scripts = ScriptRunner::in_process().expect("script engine");
    Interpreter::new(executor, scripts).with_options(options)
}

/// Options that never sleep
pub fn fast_options() -> RunOptions {
    RunOptions { skip_waits: true, ..RunOptions::default() }
}

/// Write `doc` as `workflow.json` in a fresh temp dir.
pub fn write_workflow(doc: &Value) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workflow.json");
    std::fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
    (dir, path)
}

/// Command for the built binary with config and logging isolated from the host.
pub fn stepflow(config_dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("stepflow").unwrap();
    cmd.env("STEPFLOW_CONFIG_DIR", config_dir.path()).env_remove("STEPFLOW_LOG");
    cmd
}

/// Payloads of every `[EVENT] ` line in `stdout`.
pub fn events(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(stepflow::events::parse_event_line)
        .collect()
}
