//! Script execution context and outcome
//!
//! [`ScriptContext`] is what a snippet can read; [`ScriptOutcome`] is what
//! comes back. Both are also the JSON files of the `stepflow script` process
//! contract, so field names are part of the external interface.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, PoisonError};

use crate::pipeline::Variables;

/// Read-only view handed to a snippet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptContext {
    #[serde(default)]
    pub inputs: Variables,
    #[serde(default)]
    pub context: Variables,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl ScriptContext {
    pub fn new(inputs: Variables, context: Variables, device_id: Option<String>) -> Self {
        Self { inputs, context, device_id }
    }
}

/// Result of one snippet execution. Script faults are data here, never `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub success: bool,
    /// The `set_result` map when anything was set, otherwise the return value
    #[serde(default)]
    pub result: JsonValue,
    /// Everything the snippet wrote through `console`
    #[serde(rename = "output", default)]
    pub captured_output: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScriptOutcome {
    pub fn succeeded(result: JsonValue, captured_output: String) -> Self {
        Self { success: true, result, captured_output, error: None }
    }

    pub fn failed(error: impl Into<String>, captured_output: String) -> Self {
        Self {
            success: false,
            result: JsonValue::Null,
            captured_output,
            error: Some(error.into()),
        }
    }

    /// Value written to a step's `save_to` key.
    pub fn to_context_value(&self) -> JsonValue {
        if self.success {
            self.result.clone()
        } else {
            serde_json::json!({ "error": self.error.clone().unwrap_or_default() })
        }
    }
}

/// Per-execution state shared with the host functions of one engine.
#[derive(Debug, Default)]
pub struct SessionState {
    pub inputs: Variables,
    pub context: Variables,
    pub device_id: String,
    /// Accumulated `set_result` entries
    pub result: Variables,
    /// Captured console output
    pub output: String,
}

pub type SharedSession = Arc<Mutex<SessionState>>;

pub fn new_session() -> SharedSession {
    Arc::new(Mutex::new(SessionState::default()))
}

/// Run `f` with the session locked. A panic in an earlier holder does not
/// make the state unusable, so poisoning is ignored.
pub fn with_session<R>(session: &SharedSession, f: impl FnOnce(&mut SessionState) -> R) -> R {
    let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}
