//! Post-processing argument logic
//!
//! Turns raw `NAME=VALUE` arguments into typed workflow inputs and action
//! parameters.

use crate::action::ActionParams;
use crate::errors::{Result, StepflowError};
use crate::pipeline::{Variables, Workflow};

/// Split `NAME=VALUE` at the first `=`. The name must be non-empty; the
/// value may be empty or contain further `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(StepflowError::Argument(format!(
            "expected NAME=VALUE, got '{}'",
            raw
        ))),
    }
}

pub fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter().map(|item| parse_key_value(item)).collect()
}

/// Caller inputs typed by the workflow's input declarations
pub fn workflow_inputs(workflow: &Workflow, raw: &[String]) -> Result<Variables> {
    Ok(workflow.coerce_inputs(&parse_pairs(raw)?))
}

pub fn action_params(raw: &[String]) -> Result<ActionParams> {
    Ok(parse_pairs(raw)?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=1").unwrap(), ("a".into(), "1".into()));
        assert_eq!(parse_key_value("url=http://x/?q=1").unwrap().1, "http://x/?q=1");
        assert_eq!(parse_key_value("empty=").unwrap().1, "");
        assert!(parse_key_value("=1").is_err());
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_workflow_inputs_are_typed() {
        let workflow = Workflow::from_json(
            r#"{"id": "w", "inputs": [{"name": "count", "type": "number"}, {"name": "fast", "type": "boolean"}]}"#,
        )
        .unwrap();
        let raw = vec!["count=3".to_string(), "fast=yes".to_string(), "note=hi".to_string()];
        let inputs = workflow_inputs(&workflow, &raw).unwrap();

        assert_eq!(inputs["count"], json!(3));
        assert_eq!(inputs["fast"], json!(true));
        assert_eq!(inputs["note"], json!("hi"));
    }

    #[test]
    fn test_action_params_keep_order() {
        let params = action_params(&["y=2".to_string(), "x=1".to_string()]).unwrap();
        assert_eq!(params.keys().collect::<Vec<_>>(), vec!["y", "x"]);
    }
}
