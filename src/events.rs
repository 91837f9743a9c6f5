//! Line-oriented progress events
//!
//! A host process (desktop shell, supervisor script) follows a run by reading
//! stdout line by line and picking out lines that start with `[EVENT] `. The
//! rest of the line is one JSON object tagged by `type`.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

pub const EVENT_PREFIX: &str = "[EVENT] ";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    WorkflowStart {
        workflow_id: String,
        workflow_name: String,
        device_id: Option<String>,
        total_steps: usize,
    },
    StepStart {
        step_id: String,
        step_name: String,
        kind: String,
        depth: usize,
    },
    StepComplete {
        step_id: String,
        step_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    StepFailed {
        step_id: String,
        step_name: String,
        error: String,
    },
    WorkflowComplete {
        workflow_id: String,
        success: bool,
        steps_executed: usize,
        steps_failed: usize,
        duration_ms: u64,
        interrupted: bool,
    },
}

impl Event {
    /// Render as a single marker line (without trailing newline).
    pub fn to_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{}{}", EVENT_PREFIX, json)
    }
}

/// Parse a marker line back into its JSON payload. Non-event lines give `None`.
pub fn parse_event_line(line: &str) -> Option<serde_json::Value> {
    line.strip_prefix(EVENT_PREFIX)
        .and_then(|payload| serde_json::from_str(payload).ok())
}

/// Destination for run events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes marker lines to stdout and flushes after each one so a parent
/// process reading a pipe sees progress immediately.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &Event) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", event.to_line()).ok();
        handle.flush().ok();
    }
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Keeps events in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_line_format() {
        let event = Event::StepFailed {
            step_id: "tap1".to_string(),
            step_name: "Tap login".to_string(),
            error: "Element not found".to_string(),
        };

        let line = event.to_line();
        assert!(line.starts_with("[EVENT] {"));

        let payload = parse_event_line(&line).unwrap();
        assert_eq!(payload["type"], "step_failed");
        assert!(payload.get("event").is_none());
        assert_eq!(payload["step_id"], "tap1");
    }

    #[test]
    fn test_plain_lines_are_not_events() {
        assert!(parse_event_line("INFO starting").is_none());
        assert!(parse_event_line("[EVENT] not json").is_none());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.emit(&Event::StepComplete {
            step_id: "w".to_string(),
            step_name: "Wait".to_string(),
            message: None,
        });
        assert_eq!(sink.events().len(), 1);
    }
}
