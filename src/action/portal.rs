//! HTTP device-control ("portal") executor
//!
//! Talks to an on-device agent that exposes a small JSON API, usually
//! reached through a forwarded local port:
//!
//! | action | request |
//! |---|---|
//! | ping | `GET /ping` |
//! | tap | `POST /action/tap {x, y}` |
//! | tap_index | `POST /action/tap_index {index}` |
//! | swipe & friends | `POST /action/swipe {x1, y1, x2, y2, duration}` |
//! | input_text | `POST /action/input {text, clear}` |
//! | back/home/enter/press_key | `POST /action/key {keycode}` |
//! | open_app | `POST /action/start_app {package, activity?}` |
//! | get_state | `GET /state` |
//! | screenshot | `GET /screenshot` (raw image bytes) |

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use url::Url;

use crate::errors::Result;
use super::{param_bool, param_i64, param_str, ActionExecutor, ActionParams, ActionResult, DeviceAction};

pub const DEFAULT_PORTAL_URL: &str = "http://localhost:8080";

const KEYCODE_HOME: i64 = 3;
const KEYCODE_BACK: i64 = 4;
const KEYCODE_ENTER: i64 = 66;

const DEFAULT_TAP: (i64, i64) = (540, 1200);
const DEFAULT_SWIPE_MS: i64 = 300;
const LONG_PRESS_MS: i64 = 2000;
const DOUBLE_TAP_GAP: Duration = Duration::from_millis(100);

pub struct PortalExecutor {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl PortalExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // join() replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self { client, base_url, timeout })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, String> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| format!("Invalid endpoint {}: {}", path, e))
    }

    fn describe_error(&self, path: &str, err: reqwest::Error) -> String {
        if err.is_timeout() {
            format!("{} timed out after {:.1}s", path, self.timeout.as_secs_f64())
        } else if err.is_connect() {
            format!("Cannot connect to portal at {}: {}", self.base_url, err)
        } else {
            format!("{} failed: {}", path, err)
        }
    }

    async fn read_body(path: &str, response: reqwest::Response) -> std::result::Result<JsonValue, String> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("{} returned {}: {}", path, status, text.trim()));
        }
        Ok(serde_json::from_str(&text).unwrap_or(JsonValue::String(text)))
    }

    async fn get(&self, path: &str) -> std::result::Result<JsonValue, String> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.describe_error(path, e))?;
        Self::read_body(path, response).await
    }

    async fn post(&self, path: &str, body: JsonValue) -> std::result::Result<JsonValue, String> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.describe_error(path, e))?;
        Self::read_body(path, response).await
    }

    async fn tap(&self, x: i64, y: i64) -> std::result::Result<JsonValue, String> {
        self.post("/action/tap", json!({"x": x, "y": y})).await
    }

    async fn swipe(&self, from: (i64, i64), to: (i64, i64), duration: i64) -> std::result::Result<JsonValue, String> {
        self.post(
            "/action/swipe",
            json!({"x1": from.0, "y1": from.1, "x2": to.0, "y2": to.1, "duration": duration}),
        )
        .await
    }

    async fn key(&self, keycode: i64) -> std::result::Result<JsonValue, String> {
        self.post("/action/key", json!({"keycode": keycode})).await
    }

    async fn screenshot(&self, path: Option<&str>) -> std::result::Result<ActionResult, String> {
        let url = self.endpoint("/screenshot")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.describe_error("/screenshot", e))?;
        if !response.status().is_success() {
            return Err(format!("/screenshot returned {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.describe_error("/screenshot", e))?;

        match path {
            Some(path) => {
                tokio::fs::write(path, &bytes)
                    .await
                    .map_err(|e| format!("Cannot write screenshot to {}: {}", path, e))?;
                Ok(ActionResult::ok_with_data(
                    format!("Screenshot saved: {} ({} bytes)", path, bytes.len()),
                    json!({"path": path, "bytes": bytes.len()}),
                ))
            }
            None => Ok(ActionResult::ok_with_data(
                format!("Screenshot captured ({} bytes)", bytes.len()),
                json!({"bytes": bytes.len()}),
            )),
        }
    }

    async fn tap_text(&self, text: &str) -> std::result::Result<ActionResult, String> {
        let state = self.get("/state").await?;
        let tree = state
            .get("a11y_tree")
            .and_then(|t| t.as_array())
            .or_else(|| state.as_array())
            .map(|t| t.as_slice())
            .unwrap_or(&[]);

        let Some(element) = find_element_by_text(tree, text) else {
            return Ok(ActionResult::failed(format!("Element with text '{}' not found", text)));
        };

        if let Some(bounds) = element.get("bounds").and_then(|b| b.as_str()).filter(|b| !b.is_empty()) {
            let Some((x, y)) = bounds_center(bounds) else {
                return Ok(ActionResult::failed(format!("Invalid bounds format: {}", bounds)));
            };
            self.tap(x, y).await?;
            return Ok(ActionResult::ok(format!("Tapped '{}' at ({}, {})", text, x, y)));
        }

        if let Some(index) = element.get("index").and_then(|i| i.as_i64()) {
            self.post("/action/tap_index", json!({"index": index})).await?;
            return Ok(ActionResult::ok(format!("Tapped '{}' by index {}", text, index)));
        }

        Ok(ActionResult::failed(format!("Element '{}' found but has no bounds or index", text)))
    }

    async fn dispatch(&self, action: DeviceAction, params: &ActionParams) -> std::result::Result<ActionResult, String> {
        let x = param_i64(params, "x", DEFAULT_TAP.0);
        let y = param_i64(params, "y", DEFAULT_TAP.1);

        let result = match action {
            DeviceAction::Ping => {
                let body = self.get("/ping").await?;
                ActionResult::ok_with_data("Ping: ok", body)
            }
            // `tap` with a label and no coordinates finds the element first
            DeviceAction::Tap => match param_str(params, "text") {
                Some(text) if !params.contains_key("x") && !params.contains_key("y") => self.tap_text(text).await?,
                _ => {
                    self.tap(x, y).await?;
                    ActionResult::ok(format!("Tapped at ({}, {})", x, y))
                }
            },
            DeviceAction::TapIndex => {
                let index = param_i64(params, "index", 0);
                self.post("/action/tap_index", json!({"index": index})).await?;
                ActionResult::ok(format!("Tapped index {}", index))
            }
            DeviceAction::Swipe => {
                let from = (param_i64(params, "x1", 500), param_i64(params, "y1", 1500));
                let to = (param_i64(params, "x2", 500), param_i64(params, "y2", 500));
                let duration = param_i64(params, "duration", DEFAULT_SWIPE_MS);
                self.swipe(from, to, duration).await?;
                ActionResult::ok(format!("Swiped ({},{}) -> ({},{})", from.0, from.1, to.0, to.1))
            }
            DeviceAction::SwipeUp => {
                self.swipe((500, 1500), (500, 500), DEFAULT_SWIPE_MS).await?;
                ActionResult::ok("Swipe up")
            }
            DeviceAction::SwipeDown => {
                self.swipe((500, 500), (500, 1500), DEFAULT_SWIPE_MS).await?;
                ActionResult::ok("Swipe down")
            }
            DeviceAction::SwipeLeft => {
                self.swipe((800, 960), (200, 960), DEFAULT_SWIPE_MS).await?;
                ActionResult::ok("Swipe left")
            }
            DeviceAction::SwipeRight => {
                self.swipe((200, 960), (800, 960), DEFAULT_SWIPE_MS).await?;
                ActionResult::ok("Swipe right")
            }
            DeviceAction::Back => {
                self.key(KEYCODE_BACK).await?;
                ActionResult::ok("Back")
            }
            DeviceAction::Home => {
                self.key(KEYCODE_HOME).await?;
                ActionResult::ok("Home")
            }
            DeviceAction::Enter => {
                self.key(KEYCODE_ENTER).await?;
                ActionResult::ok("Enter")
            }
            DeviceAction::PressKey => {
                let keycode = param_i64(params, "keycode", KEYCODE_BACK);
                self.key(keycode).await?;
                ActionResult::ok(format!("Press key {}", keycode))
            }
            DeviceAction::OpenApp => {
                let package = param_str(params, "package").unwrap_or("com.android.settings");
                let mut body = json!({"package": package});
                if let Some(activity) = param_str(params, "activity") {
                    body["activity"] = json!(activity);
                }
                self.post("/action/start_app", body).await?;
                ActionResult::ok(format!("Open app {}", package))
            }
            DeviceAction::InputText => {
                let text = params.get("text").map(|t| t.as_str()).unwrap_or("");
                let clear = param_bool(params, "clear");
                self.post("/action/input", json!({"text": text, "clear": clear})).await?;
                ActionResult::ok(format!("Input text ({} chars)", text.chars().count()))
            }
            DeviceAction::Screenshot => self.screenshot(param_str(params, "path")).await?,
            DeviceAction::GetState => {
                let state = self.get("/state").await?;
                ActionResult::ok_with_data("State retrieved", state)
            }
            DeviceAction::TapText => match param_str(params, "text") {
                Some(text) => self.tap_text(text).await?,
                None => ActionResult::failed("Missing text parameter"),
            },
            DeviceAction::LongPress => {
                let duration = param_i64(params, "duration", LONG_PRESS_MS);
                self.swipe((x, y), (x, y), duration).await?;
                ActionResult::ok(format!("Long press at ({}, {}) for {}ms", x, y, duration))
            }
            DeviceAction::DoubleTap => {
                self.tap(x, y).await?;
                tokio::time::sleep(DOUBLE_TAP_GAP).await;
                self.tap(x, y).await?;
                ActionResult::ok(format!("Double tap at ({}, {})", x, y))
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl ActionExecutor for PortalExecutor {
    async fn execute(&self, action: &str, params: &ActionParams) -> ActionResult {
        let Some(parsed) = DeviceAction::parse(action) else {
            return ActionResult::unknown(action);
        };

        match self.dispatch(parsed, params).await {
            Ok(result) => result,
            Err(message) => {
                tracing::warn!(action, error = %message, "portal action failed");
                ActionResult::failed(message)
            }
        }
    }

    fn name(&self) -> &str {
        "portal"
    }
}

/// Depth-first search of an accessibility tree for the first element whose
/// `text` or `contentDesc` contains `needle` (case-insensitive).
pub fn find_element_by_text<'a>(elements: &'a [JsonValue], needle: &str) -> Option<&'a JsonValue> {
    let needle = needle.to_lowercase();
    find_in(elements, &needle)
}

fn find_in<'a>(elements: &'a [JsonValue], needle: &str) -> Option<&'a JsonValue> {
    for element in elements {
        let matches = ["text", "contentDesc"].iter().any(|field| {
            element
                .get(*field)
                .and_then(|v| v.as_str())
                .map(|v| v.to_lowercase().contains(needle))
                .unwrap_or(false)
        });
        if matches {
            return Some(element);
        }
        if let Some(children) = element.get("children").and_then(|c| c.as_array()) {
            if let Some(found) = find_in(children, needle) {
                return Some(found);
            }
        }
    }
    None
}

/// Centre of a `"left,top,right,bottom"` bounds string.
pub fn bounds_center(bounds: &str) -> Option<(i64, i64)> {
    let parts: Vec<i64> = bounds
        .split(',')
        .map(|p| p.trim().parse::<i64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [left, top, right, bottom] => Some(((left + right) / 2, (top + bottom) / 2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_center() {
        assert_eq!(bounds_center("0,100,200,300"), Some((100, 200)));
        assert_eq!(bounds_center(" 10, 10, 21, 31 "), Some((15, 20)));
        assert_eq!(bounds_center("1,2,3"), None);
        assert_eq!(bounds_center("a,b,c,d"), None);
    }

    #[test]
    fn test_find_element_nested() {
        let tree = json!([
            {"text": "Header", "children": [
                {"text": "", "contentDesc": "Search button", "bounds": "0,0,10,10"}
            ]},
            {"text": "search results"}
        ]);
        let tree = tree.as_array().unwrap();

        let found = find_element_by_text(tree, "SEARCH").unwrap();
        assert_eq!(found["contentDesc"], "Search button");
        assert!(find_element_by_text(tree, "checkout").is_none());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let executor = PortalExecutor::new("http://localhost:9000/portal", Duration::from_secs(1)).unwrap();
        assert_eq!(executor.endpoint("/action/tap").unwrap().as_str(), "http://localhost:9000/portal/action/tap");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let executor = PortalExecutor::new(DEFAULT_PORTAL_URL, Duration::from_secs(1)).unwrap();
        let result = executor.execute("teleport", &ActionParams::new()).await;
        assert!(!result.success);
        assert_eq!(result.message, "Unknown action: teleport");
    }
}
