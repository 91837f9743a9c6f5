//! Executor that validates action names and records calls without touching
//! a device or browser.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{ActionExecutor, ActionParams, ActionResult, BrowserAction, DeviceAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Device,
    Browser,
}

#[derive(Debug)]
pub struct DryRunExecutor {
    surface: Surface,
    calls: Mutex<Vec<(String, ActionParams)>>,
}

impl DryRunExecutor {
    pub fn device() -> Self {
        Self { surface: Surface::Device, calls: Mutex::new(Vec::new()) }
    }

    pub fn browser() -> Self {
        Self { surface: Surface::Browser, calls: Mutex::new(Vec::new()) }
    }

    /// Every accepted call so far, in order.
    pub fn calls(&self) -> Vec<(String, ActionParams)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn is_known(&self, action: &str) -> bool {
        match self.surface {
            Surface::Device => DeviceAction::parse(action).is_some(),
            Surface::Browser => BrowserAction::parse(action).is_some(),
        }
    }
}

fn describe(params: &ActionParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, action: &str, params: &ActionParams) -> ActionResult {
        if !self.is_known(action) {
            return ActionResult::unknown(action);
        }

        if let Ok(mut calls) = self.calls.lock() {
            calls.push((action.to_string(), params.clone()));
        }

        let message = format!("[dry-run] {}({})", action, describe(params));
        match (self.surface, DeviceAction::parse(action)) {
            (Surface::Device, Some(DeviceAction::GetState)) => ActionResult::ok_with_data(
                message,
                serde_json::json!({"a11y_tree": [], "phone_state": {}}),
            ),
            _ => ActionResult::ok(message),
        }
    }

    fn name(&self) -> &str {
        match self.surface {
            Surface::Device => "dry-run device",
            Surface::Browser => "dry-run browser",
        }
    }
}
