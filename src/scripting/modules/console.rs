//! Console module for scripts
//!
//! Output never reaches stdout or stderr directly: every line is appended to
//! the session's captured output, which the step interpreter copies into
//! the run log. Lines are mirrored to `tracing` at debug level.

use rune::{ContextError, Module};

use crate::scripting::context::{with_session, SharedSession};

/// Create the console module bound to `session`.
pub fn module(session: &SharedSession) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("console")?;

    let s = session.clone();
    module
        .function("log", move |message: &str, level: &str| {
            log_line(&s, level, message);
        })
        .build()?;

    for (name, level) in [("info", "INFO"), ("warn", "WARN"), ("error", "ERROR"), ("debug", "DEBUG")] {
        let s = session.clone();
        module
            .function(name, move |message: &str| log_line(&s, level, message))
            .build()?;
    }

    let s = session.clone();
    module
        .function("print", move |message: &str| append(&s, message))
        .build()?;

    let s = session.clone();
    module
        .function("println", move |message: &str| {
            append(&s, message);
            append(&s, "\n");
        })
        .build()?;

    Ok(module)
}

/// `[HH:MM:SS] LEVEL message`
pub fn format_line(level: &str, message: &str) -> String {
    let level = match level.trim() {
        "" => "INFO".to_string(),
        other => other.to_uppercase(),
    };
    format!("[{}] {} {}", chrono::Local::now().format("%H:%M:%S"), level, message)
}

fn log_line(session: &SharedSession, level: &str, message: &str) {
    let line = format_line(level, message);
    tracing::debug!(target: "stepflow::script", "{}", line);
    with_session(session, |state| {
        state.output.push_str(&line);
        state.output.push('\n');
    });
}

fn append(session: &SharedSession, text: &str) {
    with_session(session, |state| state.output.push_str(text));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::context::new_session;
    use regex::Regex;

    #[test]
    fn test_line_format() {
        let re = Regex::new(r"^\[\d{2}:\d{2}:\d{2}\] WARN low battery$").unwrap();
        assert!(re.is_match(&format_line("warn", "low battery")));
        assert!(format_line("", "x").contains("] INFO x"));
    }

    #[test]
    fn test_output_is_captured() {
        let session = new_session();
        log_line(&session, "info", "first");
        append(&session, "raw");

        let output = with_session(&session, |state| state.output.clone());
        assert!(output.contains("INFO first\n"));
        assert!(output.ends_with("raw"));
    }
}
