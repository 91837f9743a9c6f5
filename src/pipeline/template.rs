//! `{{name}}` / `{{name.field}}` placeholder resolution
//!
//! Resolution is a single pass: the regex finds every placeholder span in the
//! raw text, each span is looked up against a merged read-only view of inputs
//! and context, and the output is assembled once. Substituted text is never
//! scanned again, so a value containing `{{...}}` stays literal.
//!
//! Unknown names are not an error; their placeholder is left verbatim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use super::context::Variables;

// Cached regex; one level of dotted access, no indexing.
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+)(?:\.([A-Za-z0-9_\-]+))?\s*\}\}").unwrap()
});

/// A placeholder reference found in template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: String,
    pub field: Option<String>,
}

/// Borrowed view over the two variable maps. On a name collision the
/// context value wins.
#[derive(Debug, Clone, Copy)]
pub struct TemplateResolver<'a> {
    inputs: &'a Variables,
    context: &'a Variables,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(inputs: &'a Variables, context: &'a Variables) -> Self {
        Self { inputs, context }
    }

    fn lookup(&self, key: &str) -> Option<&'a JsonValue> {
        self.context.get(key).or_else(|| self.inputs.get(key))
    }

    fn lookup_placeholder(&self, key: &str, field: Option<&str>) -> Option<&'a JsonValue> {
        let value = self.lookup(key)?;
        match field {
            None => Some(value),
            Some(field) => value.as_object()?.get(field),
        }
    }

    /// Substitute every resolvable placeholder in `raw`.
    pub fn resolve(&self, raw: &str) -> String {
        if !raw.contains("{{") {
            return raw.to_string();
        }

        PLACEHOLDER_RE
            .replace_all(raw, |caps: &Captures| {
                let key = &caps[1];
                let field = caps.get(2).map(|m| m.as_str());
                match self.lookup_placeholder(key, field) {
                    Some(value) => render(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Resolve an arbitrary JSON value: strings are resolved, anything else
    /// is rendered to its text first.
    pub fn resolve_value(&self, value: &JsonValue) -> String {
        match value {
            JsonValue::String(s) => self.resolve(s),
            other => self.resolve(&render(other)),
        }
    }
}

/// Natural text form of a JSON value.
///
/// Strings verbatim, `null` as `null`, numbers and booleans as written,
/// arrays and objects as compact JSON.
pub fn render(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// List every well-formed placeholder in `raw`, in order of appearance.
pub fn placeholders(raw: &str) -> Vec<Placeholder> {
    PLACEHOLDER_RE
        .captures_iter(raw)
        .map(|caps| Placeholder {
            key: caps[1].to_string(),
            field: caps.get(2).map(|m| m.as_str().to_string()),
        })
        .collect()
}

pub fn has_placeholders(raw: &str) -> bool {
    PLACEHOLDER_RE.is_match(raw)
}
