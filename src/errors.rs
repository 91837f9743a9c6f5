//! Error types for stepflow
//!
//! These are infrastructure errors: a workflow that cannot be loaded, a config
//! file that does not parse, a script host that cannot start. Step-level
//! failures (an action returning `success=false`, a script raising) are not
//! errors in this sense; they travel as data through the run report.

use thiserror::Error;

/// Main error type for stepflow
#[derive(Error, Debug)]
pub enum StepflowError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Timeout after {0:.1} seconds")]
    Timeout(f64),

    #[error("Invalid argument: {0}")]
    Argument(String),
}

pub type Result<T> = std::result::Result<T, StepflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = StepflowError::Timeout(2.5);
        assert_eq!(err.to_string(), "Timeout after 2.5 seconds");
    }

    #[test]
    fn test_io_conversion() {
        fn open() -> Result<()> {
            std::fs::read("/definitely/not/here/stepflow.json")?;
            Ok(())
        }
        assert!(matches!(open(), Err(StepflowError::Io(_))));
    }
}
