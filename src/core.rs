use clap::Parser;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::action::{execute_paced, ActionExecutor, DryRunExecutor, PortalExecutor};
use crate::cli::{action_params, workflow_inputs, ActionArgs, Args, Command, RunArgs, ScriptArgs};
use crate::config::Config;
use crate::errors::{Result, StepflowError};
use crate::events::StdoutSink;
use crate::logging;
use crate::pipeline::{load_workflow, validate_workflow, Interpreter, RunReport};
use crate::scripting::modules::{fs as sandbox, request};
use crate::scripting::{run_script_files, Isolation, ScriptRunner, SubprocessRunner};
use crate::signals::CancelToken;
use crate::status::ExitStatus;

/// Main entry point for the CLI.
///
/// Handles argument parsing, logging and configuration, then dispatches to
/// the subcommand handler on a multi-threaded tokio runtime.
pub fn run(args: Vec<String>) -> ExitStatus {
    let parsed = match Args::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                ExitStatus::Success
            } else {
                ExitStatus::Error
            };
        }
    };

    logging::init(parsed.verbose);

    let config = match Config::load(parsed.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return handle_error(e),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return handle_error(StepflowError::Io(e)),
    };

    match runtime.block_on(program(parsed, config)) {
        Ok(status) => status,
        Err(e) => handle_error(e),
    }
}

pub async fn program(args: Args, config: Config) -> Result<ExitStatus> {
    request::set_timeout(config.http_timeout());

    match args.command {
        Command::Run(run) => run_workflow(run, &config).await,
        Command::Validate { workflow } => validate(&workflow),
        Command::Action(action) => run_action(action, &config).await,
        Command::Script(script) => run_script(script).await,
    }
}

async fn run_workflow(args: RunArgs, config: &Config) -> Result<ExitStatus> {
    let workflow = load_workflow(&args.workflow)?;

    let validation = validate_workflow(&workflow);
    for warning in &validation.warnings {
        tracing::warn!("{}", warning);
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            eprintln!("error: {}", error);
        }
        return Err(StepflowError::Workflow(format!(
            "{} has {} error(s)",
            args.workflow.display(),
            validation.errors.len()
        )));
    }

    let inputs = workflow_inputs(&workflow, &args.inputs)?;

    for dir in config.scripting.allowed_dirs.iter().chain(args.allow_dirs.iter()) {
        sandbox::allow_directory(dir);
    }

    let device: Arc<dyn ActionExecutor> = if args.dry_run {
        Arc::new(DryRunExecutor::device())
    } else {
        let url = args.portal_url.as_deref().unwrap_or(&config.device.portal_url);
        Arc::new(PortalExecutor::new(url, config.action_timeout())?)
    };

    let scripts = match args.isolation.unwrap_or(config.scripting.isolation) {
        Isolation::InProcess => ScriptRunner::in_process_with_budget(config.scripting.instruction_budget)?,
        // The child inherits the sandbox through --allow-dir
        Isolation::Subprocess => ScriptRunner::Subprocess(SubprocessRunner::current_exe(config.process_timeout())?),
    };

    let mut options = config.run_options();
    if args.no_script_continue {
        options.continue_on_script_error = false;
    }
    options.skip_waits = args.dry_run;

    let cancel = CancelToken::new();
    let mut interpreter = Interpreter::new(device, scripts)
        .with_events(Arc::new(StdoutSink))
        .with_options(options)
        .with_cancel_token(cancel.clone());
    // No browser backend ships with stepflow; real runs fail browser steps
    if args.dry_run {
        interpreter = interpreter.with_browser(Arc::new(DryRunExecutor::browser()));
    }

    let timeout = workflow.timeout.filter(|t| *t > 0.0 && args.enforce_timeout);
    let watchdog = match timeout.map(|secs| (secs, timeout_duration(secs))) {
        Some((secs, Some(limit))) => {
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!(timeout_secs = secs, "workflow timeout reached, cancelling run");
                cancel.cancel();
            }))
        }
        Some((secs, None)) => {
            tracing::warn!(timeout_secs = secs, "workflow timeout out of range, not enforcing it");
            None
        }
        None => None,
    };

    tracing::info!(
        workflow = %workflow.id,
        device = args.device.as_deref().unwrap_or("dry-run"),
        dry_run = args.dry_run,
        "starting run"
    );
    let report = interpreter.run(&workflow, inputs, args.device.clone()).await;

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    finish(&report, args.report.as_deref())
}

/// Watchdog delay for a workflow `timeout`; `None` when it overflows a `Duration`
fn timeout_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn finish(report: &RunReport, report_path: Option<&Path>) -> Result<ExitStatus> {
    eprintln!("{}", report.summary());
    if let Some(path) = report_path {
        report.write_json(path)?;
        tracing::info!(path = %path.display(), "report written");
    }
    Ok(ExitStatus::from_report(report))
}

fn validate(path: &Path) -> Result<ExitStatus> {
    let workflow = load_workflow(path)?;
    let validation = validate_workflow(&workflow);

    for error in &validation.errors {
        eprintln!("error: {}", error);
    }
    for warning in &validation.warnings {
        eprintln!("warning: {}", warning);
    }
    if validation.is_valid() {
        eprintln!(
            "{}: OK ({} steps, {} warning(s))",
            path.display(),
            workflow.steps.len(),
            validation.warnings.len()
        );
    }

    Ok(ExitStatus::from_success(validation.is_valid()))
}

async fn run_action(args: ActionArgs, config: &Config) -> Result<ExitStatus> {
    let params = action_params(&args.params)?;

    let executor: Box<dyn ActionExecutor> = if args.dry_run {
        Box::new(DryRunExecutor::device())
    } else {
        let url = args.portal_url.as_deref().unwrap_or(&config.device.portal_url);
        Box::new(PortalExecutor::new(url, config.action_timeout())?)
    };

    let pacing = config.device.human_pacing && !args.no_pacing && !args.dry_run;
    tracing::info!(device = %args.device, action = %args.name, "executing action");
    let result = execute_paced(&*executor, &args.name, &params, pacing).await;

    println!("{}", serde_json::to_string(&result)?);
    Ok(ExitStatus::from_success(result.success))
}

async fn run_script(args: ScriptArgs) -> Result<ExitStatus> {
    for dir in &args.allow_dirs {
        sandbox::allow_directory(dir);
    }

    let outcome = run_script_files(&args.script, &args.context, &args.output).await?;
    if let Some(error) = &outcome.error {
        tracing::debug!(error = %error, "script failed");
    }
    Ok(ExitStatus::from_success(outcome.success))
}

fn handle_error(error: StepflowError) -> ExitStatus {
    tracing::debug!(error = ?error, "command failed");
    eprintln!("Error: {}", error);

    // All errors return the same exit code (1) following Unix conventions
    ExitStatus::Error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_duration() {
        assert_eq!(timeout_duration(2.5), Some(Duration::from_millis(2500)));
        assert_eq!(timeout_duration(1e300), None);
        assert_eq!(timeout_duration(f64::INFINITY), None);
    }
}
