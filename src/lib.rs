//! stepflow library interface
//!
//! A JSON workflow interpreter for device automation: templated steps,
//! human-like delays, sandboxed Rune snippets and a pluggable action
//! executor.
//!
//! # Module Organization
//!
//! - [`pipeline`] - Workflow model, validation, templating and the interpreter
//! - [`action`] - Action executor trait, dry-run and portal backends
//! - [`scripting`] - Sandboxed script runtime
//! - [`delay`] - Wait duration strategies
//! - [`events`] - `[EVENT]` progress lines
//! - [`signals`] - Interrupt handling and cancel tokens
//! - [`errors`] - Error types (StepflowError, Result)
//! - [`status`] - Exit status codes (ExitStatus)
//! - [`core`] - Main execution logic

pub mod action;
pub mod cli;
pub mod config;
pub mod core;
pub mod delay;
pub mod errors;
pub mod events;
pub mod logging;
pub mod pipeline;
pub mod scripting;
pub mod signals;
pub mod status;
