//! Exit status codes for the CLI
//!
//! - 0: the workflow (or single action / script) completed successfully
//! - 1: any failure, including a failed step or an infrastructure error
//! - 130: user interrupted (Ctrl+C, standard SIGINT exit code)

use std::process::{ExitCode, Termination};

use crate::pipeline::RunReport;

/// Exit status codes following standard Unix conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    Error = 1,
    /// User interrupted (Ctrl+C) - standard SIGINT code
    Interrupted = 130,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}

impl ExitStatus {
    /// Map a finished run onto an exit status.
    pub fn from_report(report: &RunReport) -> Self {
        if report.interrupted {
            ExitStatus::Interrupted
        } else if report.success {
            ExitStatus::Success
        } else {
            ExitStatus::Error
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            ExitStatus::Success
        } else {
            ExitStatus::Error
        }
    }

    /// Create an exit status from a raw exit code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitStatus::Success,
            130 => ExitStatus::Interrupted,
            _ => ExitStatus::Error,
        }
    }
}
