//! Workflow definition and parsing
//!
//! Workflows are JSON documents (YAML is accepted too, for hand-written
//! files). A step is decoded by its `type` field into a closed [`StepKind`];
//! a `type` the interpreter does not know decodes into [`StepKind::Unknown`]
//! instead of failing the whole document.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::delay::parse_millis;
use crate::errors::{Result, StepflowError};
use super::context::Variables;
use super::template::{self, has_placeholders, placeholders};

/// Maximum workflow file size (1 MB)
const MAX_WORKFLOW_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    #[serde(default, deserialize_with = "deserialize_text")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Cosmetic, carried for round-tripping editors
    #[serde(default)]
    pub color: Option<String>,

    /// Overall bound in seconds. Advisory unless the caller enforces it.
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Default post-action wait in milliseconds for action steps that do
    /// not set their own `wait_after`.
    #[serde(default, alias = "stepDelay")]
    pub step_delay: Option<u64>,

    /// Overrides the caller's script failure policy for this workflow
    #[serde(default, alias = "continueOnScriptError")]
    pub continue_on_script_error: Option<bool>,

    #[serde(default)]
    pub inputs: Vec<InputDef>,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Context keys copied into the run report's `outputs`
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Workflow {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| StepflowError::Workflow(format!("Failed to parse workflow: {}", e)))
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub fn input(&self, name: &str) -> Option<&InputDef> {
        self.inputs.iter().find(|def| def.name == name)
    }

    /// Convert raw `key=value` strings (CLI) into typed input values using
    /// the declared input types. Undeclared names stay strings.
    pub fn coerce_inputs(&self, pairs: &[(String, String)]) -> Variables {
        pairs
            .iter()
            .map(|(name, raw)| {
                let value = match self.input(name) {
                    Some(def) => def.coerce(raw),
                    None => JsonValue::String(raw.clone()),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputDef {
    pub name: String,

    #[serde(default)]
    pub label: String,

    /// `text`, `number` or `boolean`; anything else is treated as text
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: String,

    #[serde(default)]
    pub default: JsonValue,
}

fn default_input_type() -> String {
    "text".to_string()
}

impl InputDef {
    pub fn coerce(&self, raw: &str) -> JsonValue {
        match self.input_type.to_lowercase().as_str() {
            "number" => {
                let trimmed = raw.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    JsonValue::from(i)
                } else if let Some(n) = trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    JsonValue::Number(n)
                } else {
                    JsonValue::String(raw.to_string())
                }
            }
            "boolean" | "bool" => JsonValue::Bool(is_truthy(raw)),
            _ => JsonValue::String(raw.to_string()),
        }
    }
}

/// `true`, `1`, `yes` (any case, surrounding whitespace ignored).
pub fn is_truthy(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Template source text. Accepts any JSON scalar in the document so that
/// `"count": 3` and `"count": "{{n}}"` both work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateText(pub String);

impl TemplateText {
    pub fn new(text: impl Into<String>) -> Self {
        TemplateText(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for TemplateText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(TemplateText(template::render(&value)))
    }
}

fn deserialize_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Null => String::new(),
        other => template::render(&other),
    })
}

/// One node of the step tree.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub kind: StepKind,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Action(ActionStep),
    BrowserAction(ActionStep),
    Wait(WaitStep),
    RandomWait(RandomWaitStep),
    Script(ScriptStep),
    Loop(LoopStep),
    Foreach(ForeachStep),
    Condition(ConditionStep),
    /// Kind not known to this interpreter; runs as a successful no-op.
    Unknown(String),
}

impl StepKind {
    pub fn type_name(&self) -> &str {
        match self {
            StepKind::Action(_) => "action",
            StepKind::BrowserAction(_) => "browser_action",
            StepKind::Wait(_) => "wait",
            StepKind::RandomWait(_) => "random_wait",
            StepKind::Script(_) => "python",
            StepKind::Loop(_) => "loop",
            StepKind::Foreach(_) => "foreach",
            StepKind::Condition(_) => "condition",
            StepKind::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionStep {
    #[serde(default)]
    pub action: TemplateText,

    #[serde(default)]
    pub params: Variables,

    /// Milliseconds to wait after a successful action
    #[serde(default, alias = "waitAfter", alias = "delay_after", alias = "delayAfter")]
    pub wait_after: Option<TemplateText>,

    #[serde(default, alias = "waitVariance")]
    pub wait_variance: Option<f64>,

    /// Store the action's data payload (or `{success, message}`) here
    #[serde(default, alias = "saveTo")]
    pub save_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitStep {
    #[serde(default = "default_duration")]
    pub duration: TemplateText,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomWaitStep {
    #[serde(default = "default_random_min")]
    pub min: TemplateText,

    #[serde(default = "default_random_max")]
    pub max: TemplateText,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub script: TemplateText,

    #[serde(default, alias = "saveTo")]
    pub save_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopStep {
    #[serde(default = "default_loop_count")]
    pub count: TemplateText,

    #[serde(default = "default_loop_variable")]
    pub variable: String,

    #[serde(default)]
    pub body: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForeachStep {
    #[serde(default = "default_foreach_items")]
    pub items: TemplateText,

    #[serde(default = "default_foreach_variable")]
    pub variable: String,

    #[serde(default)]
    pub body: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionStep {
    #[serde(default = "default_condition")]
    pub condition: TemplateText,

    #[serde(default)]
    pub then: Vec<Step>,

    #[serde(default, rename = "else", alias = "else_branch")]
    pub else_steps: Vec<Step>,
}

pub const DEFAULT_WAIT_MS: u64 = 1000;
pub const DEFAULT_RANDOM_MIN_MS: u64 = 1000;
pub const DEFAULT_RANDOM_MAX_MS: u64 = 3000;

fn default_duration() -> TemplateText { TemplateText::new(DEFAULT_WAIT_MS.to_string()) }
fn default_random_min() -> TemplateText { TemplateText::new(DEFAULT_RANDOM_MIN_MS.to_string()) }
fn default_random_max() -> TemplateText { TemplateText::new(DEFAULT_RANDOM_MAX_MS.to_string()) }
fn default_loop_count() -> TemplateText { TemplateText::new("0") }
fn default_loop_variable() -> String { "i".to_string() }
fn default_foreach_items() -> TemplateText { TemplateText::new("[]") }
fn default_foreach_variable() -> String { "item".to_string() }
fn default_condition() -> TemplateText { TemplateText::new("false") }

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| <D::Error as de::Error>::custom("step must be an object"))?;

        let type_name = object
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let id = object.get("id").map(template::render).unwrap_or_default();

        let decoded = match type_name.as_str() {
            "action" => serde_json::from_value(value.clone()).map(StepKind::Action),
            "browser_action" => serde_json::from_value(value.clone()).map(StepKind::BrowserAction),
            "wait" => serde_json::from_value(value.clone()).map(StepKind::Wait),
            "random_wait" => serde_json::from_value(value.clone()).map(StepKind::RandomWait),
            "python" | "script" => serde_json::from_value(value.clone()).map(StepKind::Script),
            "loop" => serde_json::from_value(value.clone()).map(StepKind::Loop),
            "foreach" => serde_json::from_value(value.clone()).map(StepKind::Foreach),
            "condition" => serde_json::from_value(value.clone()).map(StepKind::Condition),
            _ => Ok(StepKind::Unknown(type_name.clone())),
        };
        let kind = decoded.map_err(|e| <D::Error as de::Error>::custom(format!("step '{}': {}", id, e)))?;

        let name = match object.get("name").and_then(|n| n.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => kind.type_name().to_string(),
        };

        Ok(Step { id, name, kind })
    }
}

/// Load a workflow from disk.
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    // Check file size before loading to prevent OOM
    let file_size = fs::metadata(path)?.len();
    if file_size > MAX_WORKFLOW_FILE_SIZE {
        return Err(StepflowError::Workflow(format!(
            "Workflow file too large: {} bytes (max {} bytes)",
            file_size, MAX_WORKFLOW_FILE_SIZE
        )));
    }

    let content = fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let workflow: Workflow = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
            StepflowError::Workflow(format!("Failed to parse YAML workflow {}: {}", path.display(), e))
        })?,
        _ => serde_json::from_str(&content).map_err(|e| {
            StepflowError::Workflow(format!("Failed to parse workflow {}: {}", path.display(), e))
        })?,
    };

    Ok(workflow)
}

/// Problems found by [`validate_workflow`]. Errors make a run pointless;
/// warnings are worth a look but the interpreter copes with them.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Static checks over the whole step tree.
///
/// Names bound by `save_to` and loop variables count as known from the point
/// they appear onward (document order), together with the declared inputs.
pub fn validate_workflow(workflow: &Workflow) -> ValidationReport {
    let mut report = ValidationReport::default();

    if workflow.steps.is_empty() {
        report.warnings.push("Workflow has no steps".to_string());
    }

    let mut seen_inputs = HashSet::new();
    for def in &workflow.inputs {
        if def.name.is_empty() {
            report.errors.push("Input definition without a name".to_string());
        } else if !seen_inputs.insert(def.name.as_str()) {
            report.errors.push(format!("Duplicate input name '{}'", def.name));
        }
    }

    let mut known: HashSet<String> = workflow.inputs.iter().map(|d| d.name.clone()).collect();
    let mut ids = HashSet::new();
    validate_steps(&workflow.steps, "steps", &mut known, &mut ids, &mut report);

    report
}

fn validate_steps(
    steps: &[Step],
    path: &str,
    known: &mut HashSet<String>,
    ids: &mut HashSet<String>,
    report: &mut ValidationReport,
) {
    for (i, step) in steps.iter().enumerate() {
        let here = format!("{}[{}]", path, i);
        let label = if step.id.is_empty() { here.clone() } else { format!("{} ({})", here, step.id) };

        if !step.id.is_empty() && !ids.insert(step.id.clone()) {
            report.errors.push(format!("{}: duplicate step id '{}'", label, step.id));
        }

        match &step.kind {
            StepKind::Action(action) | StepKind::BrowserAction(action) => {
                if action.action.as_str().trim().is_empty() {
                    report.errors.push(format!("{}: missing action name", label));
                }
                check_refs(action.action.as_str(), &label, known, report);
                for value in action.params.values() {
                    check_refs(&template::render(value), &label, known, report);
                }
                if let Some(wait) = &action.wait_after {
                    check_millis(wait, "wait_after", &label, known, report);
                }
                if let Some(target) = &action.save_to {
                    known.insert(target.clone());
                }
            }
            StepKind::Wait(wait) => check_millis(&wait.duration, "duration", &label, known, report),
            StepKind::RandomWait(wait) => {
                check_millis(&wait.min, "min", &label, known, report);
                check_millis(&wait.max, "max", &label, known, report);
            }
            StepKind::Script(script) => {
                if script.script.as_str().trim().is_empty() {
                    report.warnings.push(format!("{}: empty script", label));
                }
                check_refs(script.script.as_str(), &label, known, report);
                if let Some(target) = &script.save_to {
                    known.insert(target.clone());
                }
            }
            StepKind::Loop(lp) => {
                let count = lp.count.as_str();
                check_refs(count, &label, known, report);
                if !has_placeholders(count) && count.trim().parse::<i64>().is_err() {
                    report.errors.push(format!("{}: loop count '{}' is not an integer", label, count));
                }
                known.insert(lp.variable.clone());
                validate_steps(&lp.body, &format!("{}.body", here), known, ids, report);
            }
            StepKind::Foreach(each) => {
                check_refs(each.items.as_str(), &label, known, report);
                known.insert(each.variable.clone());
                validate_steps(&each.body, &format!("{}.body", here), known, ids, report);
            }
            StepKind::Condition(cond) => {
                check_refs(cond.condition.as_str(), &label, known, report);
                validate_steps(&cond.then, &format!("{}.then", here), known, ids, report);
                validate_steps(&cond.else_steps, &format!("{}.else", here), known, ids, report);
            }
            StepKind::Unknown(type_name) => {
                report.warnings.push(format!(
                    "{}: unknown step type '{}' will be skipped",
                    label, type_name
                ));
            }
        }
    }
}

fn check_refs(text: &str, label: &str, known: &HashSet<String>, report: &mut ValidationReport) {
    for placeholder in placeholders(text) {
        if !known.contains(&placeholder.key) {
            report.warnings.push(format!(
                "{}: '{{{{{}}}}}' does not refer to an input or an earlier save_to/loop variable",
                label, placeholder.key
            ));
        }
    }
}

fn check_millis(
    text: &TemplateText,
    field: &str,
    label: &str,
    known: &HashSet<String>,
    report: &mut ValidationReport,
) {
    check_refs(text.as_str(), label, known, report);
    if !has_placeholders(text.as_str()) && parse_millis(text.as_str()).is_none() {
        report.warnings.push(format!(
            "{}: {} '{}' is not a number of milliseconds",
            label, field, text.as_str()
        ));
    }
}
