//! Run-scoped variable state
//!
//! A [`RunContext`] lives for exactly one run. The interpreter owns it and
//! hands `&mut` down the step tree; nothing else holds it, so no locking.
//! Keys are only ever inserted or overwritten, never removed.

use serde_json::Value as JsonValue;

use super::template::TemplateResolver;
use super::workflow::InputDef;

/// Ordered name -> value map (`serde_json` is built with `preserve_order`).
pub type Variables = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    inputs: Variables,
    values: Variables,
    device_id: Option<String>,
}

impl RunContext {
    pub fn new(inputs: Variables, device_id: Option<String>) -> Self {
        Self {
            inputs,
            values: Variables::new(),
            device_id,
        }
    }

    pub fn inputs(&self) -> &Variables {
        &self.inputs
    }

    pub fn values(&self) -> &Variables {
        &self.values
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Last write wins.
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.values.insert(key.into(), value);
    }

    pub fn resolver(&self) -> TemplateResolver<'_> {
        TemplateResolver::new(&self.inputs, &self.values)
    }

    pub fn resolve(&self, raw: &str) -> String {
        self.resolver().resolve(raw)
    }

    pub fn snapshot(&self) -> Variables {
        self.values.clone()
    }
}

/// Build the Inputs map: declared defaults first, then every caller-supplied
/// value on top (undeclared names included).
pub fn seed_inputs(definitions: &[InputDef], supplied: &Variables) -> Variables {
    let mut inputs = Variables::new();
    for def in definitions {
        if !def.default.is_null() {
            inputs.insert(def.name.clone(), def.default.clone());
        }
    }
    for (name, value) in supplied {
        inputs.insert(name.clone(), value.clone());
    }
    inputs
}
