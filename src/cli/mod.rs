//! CLI argument parsing and processing

pub mod args;
pub mod process;

// Re-exports
pub use args::{ActionArgs, Args, Command, RunArgs, ScriptArgs};
pub use process::{action_params, parse_key_value, workflow_inputs};
