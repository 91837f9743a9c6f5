//! Workflow bridge for scripts
//!
//! Reads inputs and context of the running workflow and collects the values
//! a script hands back. Every function is a closure over the engine's
//! session, so nothing here is global.
//!
//! ```rune
//! let count = flow::input_int("count");
//! flow::set_result_int("doubled", count * 2);
//! ```

use rune::alloc::String as RuneString;
use rune::{ContextError, Module};
use serde_json::Value as JsonValue;

use crate::scripting::context::{with_session, SharedSession};

#[derive(Clone, Copy)]
enum Scope {
    Inputs,
    Context,
}

/// Create the flow module bound to `session`.
pub fn module(session: &SharedSession) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("flow")?;

    register_getters(&mut module, session, Scope::Inputs, "input")?;
    register_getters(&mut module, session, Scope::Context, "context")?;

    let s = session.clone();
    module
        .function("has_context", move |key: &str| {
            with_session(&s, |state| state.context.contains_key(key))
        })
        .build()?;

    let s = session.clone();
    module
        .function("device_id", move || {
            with_session(&s, |state| to_rune(state.device_id.clone()))
        })
        .build()?;

    let s = session.clone();
    module
        .function("set_result", move |key: &str, value: &str| {
            // Accept JSON text, otherwise keep it as a plain string
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| JsonValue::String(value.to_string()));
            store_result(&s, key, value);
        })
        .build()?;

    let s = session.clone();
    module
        .function("set_result_str", move |key: &str, value: &str| {
            store_result(&s, key, JsonValue::String(value.to_string()));
        })
        .build()?;

    let s = session.clone();
    module
        .function("set_result_int", move |key: &str, value: i64| {
            store_result(&s, key, JsonValue::from(value));
        })
        .build()?;

    let s = session.clone();
    module
        .function("set_result_float", move |key: &str, value: f64| {
            let value = serde_json::Number::from_f64(value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null);
            store_result(&s, key, value);
        })
        .build()?;

    let s = session.clone();
    module
        .function("set_result_bool", move |key: &str, value: bool| {
            store_result(&s, key, JsonValue::Bool(value));
        })
        .build()?;

    Ok(module)
}

/// `<prefix>`, `<prefix>_str`, `<prefix>_or`, `<prefix>_int`, `<prefix>_float`
/// and `<prefix>_bool` over one scope.
fn register_getters(
    module: &mut Module,
    session: &SharedSession,
    scope: Scope,
    prefix: &str,
) -> Result<(), ContextError> {
    let s = session.clone();
    module
        .function(prefix, move |key: &str| {
            to_rune(lookup(&s, scope, key).map(|v| v.to_string()).unwrap_or_default())
        })
        .build()?;

    let s = session.clone();
    module
        .function(format!("{}_str", prefix).as_str(), move |key: &str| {
            to_rune(lookup(&s, scope, key).map(|v| as_text(&v)).unwrap_or_default())
        })
        .build()?;

    let s = session.clone();
    module
        .function(format!("{}_or", prefix).as_str(), move |key: &str, default: &str| {
            to_rune(
                lookup(&s, scope, key)
                    .map(|v| as_text(&v))
                    .unwrap_or_else(|| default.to_string()),
            )
        })
        .build()?;

    let s = session.clone();
    module
        .function(format!("{}_int", prefix).as_str(), move |key: &str| {
            lookup(&s, scope, key).and_then(|v| as_int(&v)).unwrap_or(0)
        })
        .build()?;

    let s = session.clone();
    module
        .function(format!("{}_float", prefix).as_str(), move |key: &str| {
            lookup(&s, scope, key).and_then(|v| as_float(&v)).unwrap_or(0.0)
        })
        .build()?;

    let s = session.clone();
    module
        .function(format!("{}_bool", prefix).as_str(), move |key: &str| {
            lookup(&s, scope, key).map(|v| as_bool(&v)).unwrap_or(false)
        })
        .build()?;

    Ok(())
}

fn lookup(session: &SharedSession, scope: Scope, key: &str) -> Option<JsonValue> {
    with_session(session, |state| {
        let map = match scope {
            Scope::Inputs => &state.inputs,
            Scope::Context => &state.context,
        };
        map.get(key).cloned()
    })
}

fn store_result(session: &SharedSession, key: &str, value: JsonValue) {
    with_session(session, |state| {
        state.result.insert(key.to_string(), value);
    });
}

fn to_rune(s: String) -> RuneString {
    RuneString::try_from(s).unwrap_or_default()
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_float(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_bool(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => crate::pipeline::workflow::is_truthy(s),
        _ => false,
    }
}
