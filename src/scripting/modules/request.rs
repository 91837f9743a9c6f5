//! HTTP helpers for scripts
//!
//! Every call returns JSON text and never raises:
//!
//! ```json
//! {"success": true, "status_code": 200, "data": {...}}
//! {"success": false, "error": "..."}
//! ```
//!
//! `data` is parsed JSON when the response content type is
//! `application/json`, the body text otherwise. `success` follows the
//! status class, so a 404 is reported with `success: false` and its body.
//!
//! ```rune
//! let response = json::from_string(request::get("https://api.example.com/items"))?;
//! ```

use rune::alloc::String as RuneString;
use rune::{ContextError, Module};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

static TIMEOUT_SECS: AtomicU64 = AtomicU64::new(DEFAULT_TIMEOUT_SECS);

/// Create the request module
pub fn module() -> Result<Module, ContextError> {
    let mut module = Module::with_crate("request")?;

    module.function("get", http_get).build()?;
    module.function("get_with_headers", http_get_with_headers).build()?;
    module.function("post", http_post).build()?;
    module.function("post_json", http_post_json).build()?;

    Ok(module)
}

/// Per-request timeout for every script in this process.
pub fn set_timeout(timeout: Duration) {
    TIMEOUT_SECS.store(timeout.as_secs().max(1), Ordering::Relaxed);
}

pub fn timeout() -> Duration {
    Duration::from_secs(TIMEOUT_SECS.load(Ordering::Relaxed))
}

fn http_get(url: &str) -> RuneString {
    to_rune(send(reqwest::Method::GET, url, None, &[]))
}

/// `headers` is a JSON object of header names to values.
fn http_get_with_headers(url: &str, headers: &str) -> RuneString {
    let headers = match parse_headers(headers) {
        Ok(headers) => headers,
        Err(e) => return to_rune(error_response(&e)),
    };
    to_rune(send(reqwest::Method::GET, url, None, &headers))
}

/// POST a raw body; bodies that look like JSON get a JSON content type.
fn http_post(url: &str, body: &str) -> RuneString {
    let trimmed = body.trim_start();
    let mut headers = Vec::new();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    to_rune(send(reqwest::Method::POST, url, Some(body.to_string()), &headers))
}

/// POST a JSON document, rejecting invalid JSON before sending.
fn http_post_json(url: &str, json: &str) -> RuneString {
    let body = match serde_json::from_str::<JsonValue>(json) {
        Ok(value) => value.to_string(),
        Err(e) => return to_rune(error_response(&format!("Invalid JSON body: {}", e))),
    };
    let headers = [("Content-Type".to_string(), "application/json".to_string())];
    to_rune(send(reqwest::Method::POST, url, Some(body), &headers))
}

fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, String> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: JsonValue =
        serde_json::from_str(raw).map_err(|e| format!("Invalid headers JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "Headers must be a JSON object".to_string())?;

    Ok(object
        .iter()
        .map(|(k, v)| {
            let v = match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect())
}

fn send(
    method: reqwest::Method,
    url: &str,
    body: Option<String>,
    headers: &[(String, String)],
) -> JsonValue {
    let client = match reqwest::blocking::Client::builder().timeout(timeout()).build() {
        Ok(c) => c,
        Err(e) => return error_response(&format!("Failed to create client: {}", e)),
    };

    let mut request = client.request(method, url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    match request.send() {
        Ok(response) => {
            let status = response.status();
            let is_json = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("application/json"));
            let text = response.text().unwrap_or_default();
            let data = if is_json {
                serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
            } else {
                JsonValue::String(text)
            };

            serde_json::json!({
                "success": status.is_success(),
                "status_code": status.as_u16(),
                "data": data,
            })
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "script request failed");
            error_response(&e.to_string())
        }
    }
}

fn error_response(message: &str) -> JsonValue {
    serde_json::json!({ "success": false, "error": message })
}

fn to_rune(value: JsonValue) -> RuneString {
    RuneString::try_from(value.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_creation() {
        assert!(module().is_ok());
    }

    #[test]
    fn test_invalid_url_is_reported() {
        let response = http_get("not a url");
        let json: JsonValue = serde_json::from_str(&response).unwrap();

        assert_eq!(json["success"], false);
        assert!(!json["error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json_body_is_rejected_before_sending() {
        let response = http_post_json("http://127.0.0.1:1", "{not json");
        let json: JsonValue = serde_json::from_str(&response).unwrap();
        assert!(json["error"].as_str().unwrap().starts_with("Invalid JSON body"));
    }

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(r#"{"X-Token": "abc", "X-Retry": 3}"#).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1], ("X-Retry".to_string(), "3".to_string()));
        assert!(parse_headers("[1]").is_err());
        assert!(parse_headers("").unwrap().is_empty());
    }
}
