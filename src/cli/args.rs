//! CLI argument definitions using clap
//!
//! This module defines all command-line arguments for stepflow.

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::scripting::Isolation;

#[derive(Parser, Debug, Clone)]
#[command(name = "stepflow", version, about = "Run JSON step workflows against a device", long_about = None)]
pub struct Args {
    /// Config file (default: <config dir>/stepflow/config.toml)
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Execute a workflow
    Run(RunArgs),

    /// Check a workflow without running it
    Validate {
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,
    },

    /// Execute a single device action
    Action(ActionArgs),

    /// Run one script file (child side of subprocess isolation)
    Script(ScriptArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Workflow file (JSON, or YAML by extension)
    #[arg(value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    /// Target device id
    #[arg(short = 'd', long = "device", value_name = "ID", required_unless_present = "dry_run")]
    pub device: Option<String>,

    /// Workflow input as NAME=VALUE (repeatable)
    #[arg(short = 'i', long = "input", value_name = "NAME=VALUE")]
    pub inputs: Vec<String>,

    /// Validate actions and skip waits without touching a device
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Device portal base URL
    #[arg(long = "portal-url", value_name = "URL")]
    pub portal_url: Option<String>,

    /// Fail the step when its script fails
    #[arg(long = "no-script-continue", action = ArgAction::SetTrue)]
    pub no_script_continue: bool,

    /// Cancel the run once the workflow timeout elapses
    #[arg(long = "enforce-timeout", action = ArgAction::SetTrue)]
    pub enforce_timeout: bool,

    /// Where scripts run
    #[arg(long = "isolation", value_name = "MODE", value_enum)]
    pub isolation: Option<Isolation>,

    /// Extra directory scripts may read and write (repeatable)
    #[arg(long = "allow-dir", value_name = "DIR")]
    pub allow_dirs: Vec<PathBuf>,

    /// Write the JSON run report to FILE
    #[arg(long = "report", value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ActionArgs {
    /// Target device id
    #[arg(value_name = "DEVICE")]
    pub device: String,

    /// Action name (tap, swipe_up, input_text, ...)
    #[arg(value_name = "ACTION")]
    pub name: String,

    /// Action parameters as KEY=VALUE
    #[arg(value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Device portal base URL
    #[arg(long = "portal-url", value_name = "URL")]
    pub portal_url: Option<String>,

    /// Validate the action name only
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Skip the human-like pause before the action
    #[arg(long = "no-pacing", action = ArgAction::SetTrue)]
    pub no_pacing: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ScriptArgs {
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// JSON file with {inputs, context, device_id}
    #[arg(value_name = "CONTEXT")]
    pub context: PathBuf,

    /// Where {success, result, output, error} is written
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Directory the script may read and write (repeatable)
    #[arg(long = "allow-dir", value_name = "DIR")]
    pub allow_dirs: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_requires_device_unless_dry_run() {
        assert!(Args::try_parse_from(["stepflow", "run", "wf.json"]).is_err());

        let args = Args::try_parse_from(["stepflow", "run", "wf.json", "--dry-run", "-i", "n=3"]).unwrap();
        match args.command {
            Command::Run(run) => {
                assert!(run.dry_run);
                assert!(run.device.is_none());
                assert_eq!(run.inputs, vec!["n=3".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Args::try_parse_from(["stepflow", "validate", "wf.json", "-vv", "--config", "c.toml"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn test_isolation_values() {
        let args = Args::try_parse_from([
            "stepflow", "run", "wf.json", "--device", "emu", "--isolation", "subprocess",
        ])
        .unwrap();
        match args.command {
            Command::Run(run) => assert_eq!(run.isolation, Some(Isolation::Subprocess)),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
