//! End-to-end tests of the stepflow binary
mod common;

use predicates::prelude::*;
use serde_json::{json, Value};

use common::{events, stepflow, write_workflow};

fn settings_workflow() -> Value {
    json!({
        "id": "settings",
        "name": "Open settings",
        "inputs": [{"name": "rounds", "type": "number", "default": 2}],
        "steps": [
            {"id": "open", "type": "action", "action": "open_app", "params": {"package": "com.android.settings"}, "wait_after": 5000},
            {"id": "scroll", "type": "loop", "count": "{{rounds}}", "body": [
                {"id": "swipe", "type": "action", "action": "swipe_up"},
                {"id": "pause", "type": "random_wait", "min": 2000, "max": 4000}
            ]},
            {"id": "note", "type": "python", "script": "flow::set_result_int(\"rounds\", flow::input_int(\"rounds\"));", "save_to": "summary"}
        ]
    })
}

// ============================================================================
// Help and Version
// ============================================================================

#[test]
fn test_help() {
    let config = tempfile::tempdir().unwrap();
    stepflow(&config)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("validate")));
}

#[test]
fn test_version() {
    let config = tempfile::tempdir().unwrap();
    stepflow(&config)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_requires_device_unless_dry_run() {
    let config = tempfile::tempdir().unwrap();
    let (_dir, path) = write_workflow(&settings_workflow());

    stepflow(&config).arg("run").arg(&path).assert().code(1);
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn test_validate_ok() {
    let config = tempfile::tempdir().unwrap();
    let (_dir, path) = write_workflow(&settings_workflow());

    stepflow(&config)
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("OK (3 steps"));
}

#[test]
fn test_validate_reports_errors() {
    let config = tempfile::tempdir().unwrap();
    let (_dir, path) = write_workflow(&json!({
        "id": "broken",
        "steps": [
            {"id": "a", "type": "action"},
            {"id": "a", "type": "loop", "count": "lots"}
        ]
    }));

    stepflow(&config)
        .arg("validate")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing action name"))
        .stderr(predicate::str::contains("duplicate step id 'a'"));
}

#[test]
fn test_validate_missing_file() {
    let config = tempfile::tempdir().unwrap();
    stepflow(&config)
        .args(["validate", "/nonexistent/workflow.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn test_dry_run_emits_events_and_report() {
    let config = tempfile::tempdir().unwrap();
    let (dir, path) = write_workflow(&settings_workflow());
    let report_path = dir.path().join("report.json");

    let output = stepflow(&config)
        .arg("run")
        .arg(&path)
        .args(["--dry-run", "-i", "rounds=3", "--report"])
        .arg(&report_path)
        .assert()
        .success()
        .stderr(predicate::str::contains("[SUCCESS]"))
        .get_output()
        .clone();

    let events = events(&output.stdout);
    assert_eq!(events.first().unwrap()["type"], "workflow_start");
    assert_eq!(events.first().unwrap()["total_steps"], 3);
    let swipes = events
        .iter()
        .filter(|e| e["type"] == "step_start" && e["step_id"] == "swipe")
        .count();
    assert_eq!(swipes, 3);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "workflow_complete");
    assert_eq!(last["success"], true);
    assert_eq!(last["steps_executed"], 3);

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["context"]["summary"], json!({"rounds": 3}));
}

#[test]
fn test_dry_run_unknown_action_fails() {
    let config = tempfile::tempdir().unwrap();
    let (_dir, path) = write_workflow(&json!({
        "id": "typo",
        "steps": [{"id": "t", "name": "Typo", "type": "action", "action": "tapp"}]
    }));

    let output = stepflow(&config)
        .arg("run")
        .arg(&path)
        .arg("--dry-run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown action: tapp"))
        .get_output()
        .clone();

    let events = events(&output.stdout);
    assert!(events.iter().any(|e| e["type"] == "step_failed" && e["step_id"] == "t"));
}

#[test]
fn test_oversized_timeout_is_not_enforced() {
    let config = tempfile::tempdir().unwrap();
    let (_dir, path) = write_workflow(&json!({
        "id": "patient",
        "timeout": 1e300,
        "steps": [{"id": "a", "type": "action", "action": "home"}]
    }));

    stepflow(&config)
        .arg("run")
        .arg(&path)
        .args(["--dry-run", "--enforce-timeout"])
        .assert()
        .success()
        .stderr(predicate::str::contains("[SUCCESS]"));
}

#[test]
fn test_no_script_continue_flag() {
    let config = tempfile::tempdir().unwrap();
    let (_dir, path) = write_workflow(&json!({
        "id": "script",
        "steps": [{"id": "s", "type": "python", "script": "let = ;"}]
    }));

    stepflow(&config).arg("run").arg(&path).arg("--dry-run").assert().success();
    stepflow(&config)
        .arg("run")
        .arg(&path)
        .args(["--dry-run", "--no-script-continue"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CompileError"));
}

#[test]
fn test_config_file_sets_script_policy() {
    let config = tempfile::tempdir().unwrap();
    std::fs::write(
        config.path().join("config.toml"),
        "[defaults]\ncontinue_on_script_error = false\n",
    )
    .unwrap();
    let (_dir, path) = write_workflow(&json!({
        "id": "script",
        "steps": [{"id": "s", "type": "python", "script": "let = ;"}]
    }));

    stepflow(&config).arg("run").arg(&path).arg("--dry-run").assert().code(1);
}

#[test]
fn test_subprocess_isolation() {
    let config = tempfile::tempdir().unwrap();
    let (dir, path) = write_workflow(&json!({
        "id": "isolated",
        "steps": [{"id": "s", "type": "python", "script": "flow::set_result_str(\"who\", flow::device_id());", "save_to": "r"}]
    }));
    let report_path = dir.path().join("report.json");

    stepflow(&config)
        .arg("run")
        .arg(&path)
        .args(["--device", "pixel-7", "--dry-run", "--isolation", "subprocess", "--report"])
        .arg(&report_path)
        .assert()
        .success();

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["context"]["r"], json!({"who": "pixel-7"}));
}

// ============================================================================
// Action and Script Subcommands
// ============================================================================

#[test]
fn test_action_dry_run_prints_result() {
    let config = tempfile::tempdir().unwrap();
    let output = stepflow(&config)
        .args(["action", "emulator-5554", "tap", "x=10", "y=20", "--dry-run"])
        .assert()
        .success()
        .get_output()
        .clone();

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
}

#[test]
fn test_script_subcommand_writes_outcome() {
    let config = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("script.rn");
    let context = dir.path().join("context.json");
    let output = dir.path().join("output.json");
    std::fs::write(&script, "console::info(\"hi\");\nflow::context_int(\"n\") * 3").unwrap();
    std::fs::write(&context, r#"{"inputs": {}, "context": {"n": 14}, "device_id": null}"#).unwrap();

    stepflow(&config).arg("script").args([&script, &context, &output]).assert().success();

    let outcome: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["result"], 42);
    assert!(outcome["output"].as_str().unwrap().contains("INFO hi"));
}

#[test]
fn test_script_subcommand_failure_exit_code() {
    let config = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("script.rn");
    let context = dir.path().join("context.json");
    let output = dir.path().join("output.json");
    std::fs::write(&script, "let = ;").unwrap();
    std::fs::write(&context, "{}").unwrap();

    stepflow(&config).arg("script").args([&script, &context, &output]).assert().code(1);

    let outcome: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(outcome["success"], false);
    assert!(outcome["error"].as_str().unwrap().starts_with("CompileError:"));
}
