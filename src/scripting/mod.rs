//! Sandboxed script runtime
//!
//! Workflow `python` steps carry short Rune snippets. They run with a
//! narrow host surface (see [`modules`]) and report every failure as data
//! in a [`ScriptOutcome`]; a broken script never takes the run down.
//!
//! Two isolation modes exist: the engine can live in the interpreter's own
//! process, or each snippet can run in a child `stepflow script` process
//! with a hard timeout.

pub mod context;
pub mod modules;
pub mod process;
pub mod runtime;

pub use context::{ScriptContext, ScriptOutcome};
pub use process::{run_script_files, SubprocessRunner};
pub use runtime::{ScriptEngine, DEFAULT_INSTRUCTION_BUDGET};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Isolation {
    #[default]
    InProcess,
    Subprocess,
}

/// Script executor used by the interpreter
pub enum ScriptRunner {
    InProcess(ScriptEngine),
    Subprocess(SubprocessRunner),
}

impl ScriptRunner {
    pub fn in_process() -> Result<Self> {
        Ok(ScriptRunner::InProcess(ScriptEngine::new()?))
    }

    /// In-process runner whose snippets stop after `budget` VM instructions
    pub fn in_process_with_budget(budget: usize) -> Result<Self> {
        Ok(ScriptRunner::InProcess(ScriptEngine::new()?.with_budget(budget)))
    }

    pub fn isolation(&self) -> Isolation {
        match self {
            ScriptRunner::InProcess(_) => Isolation::InProcess,
            ScriptRunner::Subprocess(_) => Isolation::Subprocess,
        }
    }

    pub async fn execute(&mut self, source: &str, ctx: &ScriptContext) -> ScriptOutcome {
        match self {
            ScriptRunner::InProcess(engine) => engine.execute(source, ctx).await,
            ScriptRunner::Subprocess(runner) => runner.execute(source, ctx).await,
        }
    }
}
