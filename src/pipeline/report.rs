//! Run results
//!
//! A [`RunReport`] is produced for every run, including failed and
//! interrupted ones. It carries the first failing top-level step and the
//! accumulated log of everything that executed before it.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::errors::Result;
use super::context::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339
    pub timestamp: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            level,
            step_id: step_id.filter(|id| !id.is_empty()).map(str::to_string),
            message: message.into(),
        }
    }
}

/// First top-level step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    /// Zero-based position among the top-level steps
    pub index: usize,
    pub id: String,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow_id: String,
    pub workflow_name: String,
    pub success: bool,
    /// Top-level steps that ran to an outcome, the failing one included
    pub steps_executed: usize,
    pub steps_failed: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Final context snapshot
    pub context: Variables,
    /// The workflow's declared `outputs`, picked from the context
    pub outputs: Variables,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
    pub interrupted: bool,
    pub logs: Vec<LogEntry>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl RunReport {
    /// Human-readable summary for stderr.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let status = if self.interrupted {
            "INTERRUPTED"
        } else if self.success {
            "SUCCESS"
        } else {
            "FAILED"
        };
        // Millisecond precision is enough for a summary line
        let duration = Duration::from_millis(self.duration.as_millis() as u64);

        let _ = writeln!(out, "Workflow: {} [{}]", self.workflow_name, status);
        let _ = writeln!(out, "  Steps executed: {}", self.steps_executed);
        let _ = writeln!(out, "  Steps failed:   {}", self.steps_failed);
        let _ = writeln!(out, "  Duration:       {}", humantime::format_duration(duration));
        if let Some(failed) = &self.failed_step {
            let _ = writeln!(
                out,
                "  Failed at step {} ({}): {}",
                failed.index + 1,
                if failed.name.is_empty() { &failed.id } else { &failed.name },
                failed.message
            );
        }
        if !self.outputs.is_empty() {
            let outputs = serde_json::to_string(&self.outputs).unwrap_or_default();
            let _ = writeln!(out, "  Outputs:        {}", outputs);
        }
        let context = serde_json::to_string(&self.context).unwrap_or_default();
        let _ = write!(out, "  Context:        {}", context);
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
