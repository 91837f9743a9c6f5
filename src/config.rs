//! Config file handling
//!
//! Settings come from a TOML file, `--config PATH` or
//! `<config_dir>/stepflow/config.toml`. A missing default file means
//! defaults; a missing explicit file is an error. Command-line flags are
//! applied on top by the caller.
//!
//! ```toml
//! [defaults]
//! continue_on_script_error = true
//! wait_variance = 0.15
//!
//! [scripting]
//! isolation = "subprocess"
//! allowed_dirs = ["/data/exports"]
//! instruction_budget = 50000000
//!
//! [device]
//! portal_url = "http://localhost:8080"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::action::portal::DEFAULT_PORTAL_URL;
use crate::delay::DEFAULT_VARIANCE;
use crate::errors::{Result, StepflowError};
use crate::pipeline::RunOptions;
use crate::scripting::modules::request::DEFAULT_TIMEOUT_SECS;
use crate::scripting::runtime::DEFAULT_INSTRUCTION_BUDGET;
use crate::scripting::Isolation;

/// Overrides the config directory lookup
pub const CONFIG_DIR_ENV: &str = "STEPFLOW_CONFIG_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: DefaultsConfig,
    pub scripting: ScriptingConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub continue_on_script_error: bool,
    pub wait_variance: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            continue_on_script_error: true,
            wait_variance: DEFAULT_VARIANCE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    pub isolation: Isolation,
    /// Directories the `fs` script module may use; empty means the temp dir
    pub allowed_dirs: Vec<PathBuf>,
    pub http_timeout_secs: u64,
    /// Per-snippet limit in subprocess isolation
    pub process_timeout_secs: u64,
    /// VM instructions a snippet may run before it fails
    pub instruction_budget: usize,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::InProcess,
            allowed_dirs: Vec::new(),
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            process_timeout_secs: 60,
            instruction_budget: DEFAULT_INSTRUCTION_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub portal_url: String,
    pub action_timeout_secs: u64,
    /// Human-like pause before single actions issued with `stepflow action`
    pub human_pacing: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            action_timeout_secs: 30,
            human_pacing: true,
        }
    }
}

impl Config {
    /// Load from `explicit`, or from the default location when `None`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::default_config_file();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StepflowError::Config(format!("Failed to read config {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| StepflowError::Config(format!("{} ({})", e, path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| StepflowError::Config(format!("Invalid config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=10.0).contains(&self.defaults.wait_variance) {
            return Err(StepflowError::Config(format!(
                "defaults.wait_variance must be between 0 and 10, got {}",
                self.defaults.wait_variance
            )));
        }
        if self.scripting.process_timeout_secs == 0 {
            return Err(StepflowError::Config("scripting.process_timeout_secs must be positive".to_string()));
        }
        if self.scripting.instruction_budget == 0 {
            return Err(StepflowError::Config("scripting.instruction_budget must be positive".to_string()));
        }
        Ok(())
    }

    /// Get the default config directory
    pub fn default_config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .map(|p| p.join("stepflow"))
            .unwrap_or_else(|| PathBuf::from(".stepflow"))
    }

    pub fn default_config_file() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Interpreter options implied by this config
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            continue_on_script_error: self.defaults.continue_on_script_error,
            wait_variance: self.defaults.wait_variance,
            action_timeout: Some(self.action_timeout()),
            skip_waits: false,
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.device.action_timeout_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.scripting.http_timeout_secs.max(1))
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.scripting.process_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.defaults.continue_on_script_error);
        assert_eq!(config.scripting.isolation, Isolation::InProcess);
        assert_eq!(config.device.portal_url, "http://localhost:8080");
        assert_eq!(config.scripting.http_timeout_secs, 30);
        assert_eq!(config.scripting.instruction_budget, DEFAULT_INSTRUCTION_BUDGET);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [defaults]
            continue_on_script_error = false

            [scripting]
            isolation = "subprocess"
            allowed_dirs = ["/data"]
            instruction_budget = 1000
            "#,
        )
        .unwrap();

        assert!(!config.defaults.continue_on_script_error);
        assert_eq!(config.defaults.wait_variance, DEFAULT_VARIANCE);
        assert_eq!(config.scripting.isolation, Isolation::Subprocess);
        assert_eq!(config.scripting.allowed_dirs, vec![PathBuf::from("/data")]);
        assert_eq!(config.scripting.instruction_budget, 1000);
        assert!(!config.run_options().continue_on_script_error);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_toml("[defaults]\nwait_variance = -1.0").is_err());
        assert!(Config::from_toml("[scripting]\nisolation = \"docker\"").is_err());
        assert!(Config::from_toml("[scripting]\ninstruction_budget = 0").is_err());
        assert!(Config::from_toml("not toml = = 1").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/stepflow.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\nportal_url = \"http://10.0.0.5:8080\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.device.portal_url, "http://10.0.0.5:8080");
        assert!(config.device.human_pacing);
    }
}
