//! Device and browser action executors
//!
//! The interpreter only knows action *names* and string parameters. An
//! [`ActionExecutor`] turns those into real effects and always answers with
//! an [`ActionResult`]: unknown names and backend failures are reported as
//! `success = false`, never as an `Err`.

pub mod dry_run;
pub mod portal;

pub use dry_run::DryRunExecutor;
pub use portal::PortalExecutor;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::delay::DelayStrategy;

/// Resolved action parameters, in declaration order.
pub type ActionParams = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Payload for actions that return something (`get_state`, `screenshot`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), data: None }
    }

    pub fn ok_with_data(message: impl Into<String>, data: JsonValue) -> Self {
        Self { success: true, message: message.into(), data: Some(data) }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }

    pub fn unknown(action: &str) -> Self {
        Self::failed(format!("Unknown action: {}", action))
    }

    /// Value stored under a step's `save_to`: the payload when there is one.
    pub fn to_context_value(&self) -> JsonValue {
        match &self.data {
            Some(data) => data.clone(),
            None => serde_json::json!({"success": self.success, "message": self.message}),
        }
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Perform `action` with `params`.
    async fn execute(&self, action: &str, params: &ActionParams) -> ActionResult;

    /// Short label used in logs.
    fn name(&self) -> &str;
}

/// Device actions understood by the device executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Tap,
    TapIndex,
    Swipe,
    SwipeUp,
    SwipeDown,
    SwipeLeft,
    SwipeRight,
    Back,
    Home,
    Enter,
    PressKey,
    OpenApp,
    InputText,
    Screenshot,
    GetState,
    Ping,
    TapText,
    LongPress,
    DoubleTap,
}

impl DeviceAction {
    pub fn parse(name: &str) -> Option<Self> {
        let action = match name.trim() {
            "tap" => DeviceAction::Tap,
            "tap_index" => DeviceAction::TapIndex,
            "swipe" => DeviceAction::Swipe,
            "swipe_up" => DeviceAction::SwipeUp,
            "swipe_down" => DeviceAction::SwipeDown,
            "swipe_left" => DeviceAction::SwipeLeft,
            "swipe_right" => DeviceAction::SwipeRight,
            "back" => DeviceAction::Back,
            "home" => DeviceAction::Home,
            "enter" => DeviceAction::Enter,
            "press_key" | "key_press" => DeviceAction::PressKey,
            "open_app" | "start_app" => DeviceAction::OpenApp,
            "input_text" | "type" => DeviceAction::InputText,
            "screenshot" => DeviceAction::Screenshot,
            "get_state" => DeviceAction::GetState,
            "ping" => DeviceAction::Ping,
            "tap_text" | "tap_element" => DeviceAction::TapText,
            "long_press" => DeviceAction::LongPress,
            "double_tap" => DeviceAction::DoubleTap,
            _ => return None,
        };
        Some(action)
    }
}

/// Browser actions understood by browser executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserAction {
    OpenUrl,
    Type,
    Click,
    ClickResult,
    Scroll,
    ScrollLoop,
    Back,
    Screenshot,
    WaitElement,
}

impl BrowserAction {
    pub fn parse(name: &str) -> Option<Self> {
        let action = match name.trim() {
            "open_url" => BrowserAction::OpenUrl,
            "type" => BrowserAction::Type,
            "click" => BrowserAction::Click,
            "click_result" => BrowserAction::ClickResult,
            "scroll" => BrowserAction::Scroll,
            "scroll_loop" => BrowserAction::ScrollLoop,
            "back" => BrowserAction::Back,
            "screenshot" => BrowserAction::Screenshot,
            "wait_element" => BrowserAction::WaitElement,
            _ => return None,
        };
        Some(action)
    }
}

/// Integer parameter with a default. Unparsable values fall back too.
pub fn param_i64(params: &ActionParams, key: &str, default: i64) -> i64 {
    params
        .get(key)
        .and_then(|v| {
            let v = v.trim();
            v.parse::<i64>().ok().or_else(|| v.parse::<f64>().ok().map(|f| f as i64))
        })
        .unwrap_or(default)
}

pub fn param_str<'a>(params: &'a ActionParams, key: &str) -> Option<&'a str> {
    params.get(key).map(|v| v.as_str()).filter(|v| !v.is_empty())
}

pub fn param_bool(params: &ActionParams, key: &str) -> bool {
    params
        .get(key)
        .map(|v| crate::pipeline::workflow::is_truthy(v))
        .unwrap_or(false)
}

/// Execute one action outside the step DSL, preceded by a human-like pause.
pub async fn execute_paced(
    executor: &dyn ActionExecutor,
    action: &str,
    params: &ActionParams,
    pacing: bool,
) -> ActionResult {
    if pacing {
        let waited = DelayStrategy::human().pause().await;
        tracing::debug!(action, waited_ms = waited.as_millis() as u64, "human pacing");
    }
    executor.execute(action, params).await
}
