//! Out-of-process script execution
//!
//! The contract is file based: the child receives a script file, a context
//! JSON file `{inputs, context, device_id}` and an output path, writes
//! `{success, result, output, error}` there and exits 0 iff the script
//! succeeded. `stepflow script` is the child side; [`SubprocessRunner`] is
//! the parent side.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::context::{ScriptContext, ScriptOutcome};
use super::modules::fs as sandbox;
use super::runtime::ScriptEngine;
use crate::errors::{Result, StepflowError};

/// Child side: run `script` with `context`, write the outcome to `output`.
pub async fn run_script_files(script: &Path, context: &Path, output: &Path) -> Result<ScriptOutcome> {
    let source = tokio::fs::read_to_string(script).await?;
    let ctx_text = tokio::fs::read_to_string(context).await?;
    let ctx: ScriptContext = serde_json::from_str(&ctx_text)
        .map_err(|e| StepflowError::Script(format!("Invalid context file {}: {}", context.display(), e)))?;

    let mut engine = ScriptEngine::new()?;
    let outcome = engine.execute(&source, &ctx).await;

    tokio::fs::write(output, serde_json::to_string_pretty(&outcome)?).await?;
    Ok(outcome)
}

/// Parent side: spawn the script subcommand per call.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    program: PathBuf,
    timeout: Duration,
    allowed_dirs: Vec<PathBuf>,
}

impl SubprocessRunner {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { program: program.into(), timeout, allowed_dirs: Vec::new() }
    }

    /// Re-invoke the running executable.
    pub fn current_exe(timeout: Duration) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, timeout))
    }

    /// Directories the child sandbox may use
    pub fn with_allowed_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.allowed_dirs = dirs;
        self
    }

    pub async fn execute(&self, source: &str, ctx: &ScriptContext) -> ScriptOutcome {
        match self.spawn(source, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => ScriptOutcome::failed(format!("ProcessError: {}", e), String::new()),
        }
    }

    async fn spawn(&self, source: &str, ctx: &ScriptContext) -> Result<ScriptOutcome> {
        let dir = tempfile::tempdir()?;
        let script_path = dir.path().join("script.rn");
        let context_path = dir.path().join("context.json");
        let output_path = dir.path().join("output.json");

        tokio::fs::write(&script_path, source).await?;
        tokio::fs::write(&context_path, serde_json::to_string(ctx)?).await?;

        let mut command = tokio::process::Command::new(&self.program);
        command.arg("script");
        for allowed in self.allowed_dirs.iter().chain(sandbox::allowed_directories().iter()) {
            command.arg("--allow-dir").arg(allowed);
        }
        command
            .arg(&script_path)
            .arg(&context_path)
            .arg(&output_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program.display(), "spawning script process");
        let child = command.spawn()?;
        let finished = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| StepflowError::Timeout(self.timeout.as_secs_f64()))??;

        match tokio::fs::read_to_string(&output_path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(_) => {
                let stderr = String::from_utf8_lossy(&finished.stderr).trim().to_string();
                Err(StepflowError::Script(format!(
                    "script process exited with {} and no output{}",
                    finished.status,
                    if stderr.is_empty() { String::new() } else { format!(": {}", stderr) }
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_script_files() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.rn");
        let context = dir.path().join("c.json");
        let output = dir.path().join("o.json");
        std::fs::write(&script, r#"flow::set_result_int("n", flow::input_int("n") + 1);"#).unwrap();
        std::fs::write(&context, r#"{"inputs": {"n": 4}, "context": {}, "device_id": null}"#).unwrap();

        let outcome = run_script_files(&script, &context, &output).await.unwrap();
        assert!(outcome.success);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written["result"], json!({"n": 5}));
        assert_eq!(written["output"], "");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_failed_outcome() {
        let runner = SubprocessRunner::new("/nonexistent/stepflow", Duration::from_secs(5));
        let outcome = runner.execute("1", &ScriptContext::default()).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("ProcessError:"));
    }
}
