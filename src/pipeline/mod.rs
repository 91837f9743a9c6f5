//! Workflow pipeline
//!
//! Loading, validation, templating and execution of step workflows.

pub mod context;
pub mod report;
pub mod runner;
pub mod template;
pub mod workflow;

pub use context::{seed_inputs, RunContext, Variables};
pub use report::{FailedStep, LogEntry, LogLevel, RunReport};
pub use runner::{Interpreter, RunOptions, MAX_LOOP_ITERATIONS};
pub use template::TemplateResolver;
pub use workflow::{load_workflow, validate_workflow, Step, StepKind, ValidationReport, Workflow};
