//! Script runtime integration tests
//!
//! Exercises the host modules through the engine: `request` against a mock
//! server, `fs` inside the temp-dir sandbox, plus the numeric helpers and
//! the workflow-facing context getters.

use serde_json::{json, Map, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stepflow::scripting::{ScriptContext, ScriptEngine, ScriptOutcome};

async fn run(source: &str, inputs: Value, context: Value) -> ScriptOutcome {
    let mut engine = ScriptEngine::new().unwrap();
    let ctx = ScriptContext::new(
        inputs.as_object().cloned().unwrap_or_default(),
        context.as_object().cloned().unwrap_or_default(),
        Some("emulator-5554".into()),
    );
    engine.execute(source, &ctx).await
}

// ============================================================================
// Request Module Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_request_get_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"price": "1,299.50"})))
        .mount(&server)
        .await;

    let source = format!(
        r#"
        let response = request::get("{}/price");
        flow::set_result("response", response);
        "#,
        server.uri()
    );
    let outcome = run(&source, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["response"]["success"], json!(true));
    assert_eq!(outcome.result["response"]["status_code"], json!(200));
    assert_eq!(outcome.result["response"]["data"]["price"], json!("1,299.50"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_get_with_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("x-token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let source = format!(
        r#"flow::set_result("r", request::get_with_headers("{}/me", "{{\"x-token\": \"abc\"}}"));"#,
        server.uri()
    );
    let outcome = run(&source, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["r"]["data"], json!("hello"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_post_json_and_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(body_json(json!({"step": "login"})))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = format!(
        r#"flow::set_result("r", request::post_json("{}/events", "{{\"step\": \"login\"}}"));"#,
        server.uri()
    );
    let outcome = run(&source, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["r"]["success"], json!(false));
    assert_eq!(outcome.result["r"]["status_code"], json!(503));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_connection_failure_is_data() {
    let outcome = run(
        r#"flow::set_result("r", request::get("http://127.0.0.1:1/unreachable"));"#,
        json!({}),
        json!({}),
    )
    .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["r"]["success"], json!(false));
    assert!(outcome.result["r"]["error"].is_string());
}

// ============================================================================
// Filesystem Module Tests
// ============================================================================

#[tokio::test]
async fn test_fs_json_round_trip_in_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("state.json");
    let file = file.to_string_lossy().replace('\\', "/");

    let source = format!(
        r#"
        let written = fs::write_json("{file}", "{{\"count\": 3}}");
        flow::set_result("written", written);
        flow::set_result("read", fs::read_json("{file}"));
        flow::set_result_bool("exists", fs::exists("{file}"));
        "#
    );
    let outcome = run(&source, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["written"]["success"], json!(true));
    assert_eq!(outcome.result["read"]["data"], json!({"count": 3}));
    assert_eq!(outcome.result["exists"], json!(true));
}

#[tokio::test]
async fn test_fs_csv_rows() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("accounts.csv");
    std::fs::write(&file, "user,points\nana,10\nbo,7\n").unwrap();
    let file = file.to_string_lossy().replace('\\', "/");

    let source = format!(r#"flow::set_result("rows", fs::read_csv("{file}", true));"#);
    let outcome = run(&source, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(
        outcome.result["rows"]["data"],
        json!([{"user": "ana", "points": "10"}, {"user": "bo", "points": "7"}])
    );
}

#[tokio::test]
async fn test_fs_outside_sandbox_is_denied() {
    let outcome = run(r#"flow::set_result("r", fs::read_json("/etc/passwd"));"#, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["r"]["success"], json!(false));
}

// ============================================================================
// Context and Helper Tests
// ============================================================================

#[tokio::test]
async fn test_context_getters() {
    let source = r#"
        let total = flow::context_int("points") + flow::input_int("bonus");
        flow::set_result_int("total", total);
        flow::set_result_str("name", flow::context_or("name", "guest"));
        flow::set_result_bool("has_points", flow::has_context("points"));
        flow::set_result_bool("verbose", flow::input_bool("verbose"));
    "#;
    let outcome = run(source, json!({"bonus": "5", "verbose": "yes"}), json!({"points": 37})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(
        outcome.result,
        json!({"total": 42, "name": "guest", "has_points": true, "verbose": true})
    );
}

#[tokio::test]
async fn test_num_helpers() {
    let source = r#"
        let price = num::parse("$1,299.50", 0.0);
        flow::set_result_str("formatted", num::format(price * 2.0, 2));
        flow::set_result_int("count", num::parse_int("x 12 items", -1));
    "#;
    let outcome = run(source, json!({}), json!({})).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result["formatted"], json!("2,599.00"));
    assert_eq!(outcome.result["count"], json!(12));
}

#[tokio::test]
async fn test_console_output_is_captured_in_order() {
    let source = r#"
        console::info("first");
        console::warn("second");
        console::println("third");
    "#;
    let outcome = run(source, json!({}), json!({})).await;

    let lines: Vec<&str> = outcome.captured_output.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("INFO first"));
    assert!(lines[1].ends_with("WARN second"));
    assert_eq!(lines[2], "third");
    assert_eq!(outcome.result, Value::Null);
}

#[tokio::test]
async fn test_explicit_main_returning_map() {
    let source = r#"
        pub fn main() {
            let doubled = flow::input_int("n") * 2;
            #{ "doubled": doubled }
        }
    "#;
    let outcome = run(source, json!({"n": 21}), Value::Object(Map::new())).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.result, json!({"doubled": 42}));
}
