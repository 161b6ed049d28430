//! Engine settings
//!
//! Settings come from defaults, then a TOML file (the user config directory
//! or an explicit path), then `PROMPTFLOW_*` environment variables. The CLI
//! applies its own flags on top.

use crate::error::{ErrorCode, ErrorExt, PipelineError};
use crate::mapreduce::ai_reduce::DEFAULT_RESULTS_FILE_THRESHOLD;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_AI_COMMAND: &str = "claude -p";
pub const DEFAULT_SKILLS_DIR: &str = ".github/skills";
const ENV_PREFIX: &str = "PROMPTFLOW_";

/// Location of the user-level settings file, if a home directory exists
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "promptflow", "promptflow")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Command line of the AI CLI; the prompt is written to its stdin
    pub ai_command: String,
    pub max_concurrency: usize,
    pub map_timeout_ms: Option<u64>,
    /// Generic retries for failed (not timed out) map calls
    pub retry_attempts: u32,
    /// Parent directory for the per-run temp directory
    pub temp_dir: Option<PathBuf>,
    pub skills_dir: PathBuf,
    /// Serialized results above this size should go through `{{RESULTS_FILE}}`
    pub results_file_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ai_command: DEFAULT_AI_COMMAND.to_string(),
            max_concurrency: 5,
            map_timeout_ms: None,
            retry_attempts: 0,
            temp_dir: None,
            skills_dir: PathBuf::from(DEFAULT_SKILLS_DIR),
            results_file_threshold: DEFAULT_RESULTS_FILE_THRESHOLD,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the user config file when `None`
    ///
    /// An explicit path must exist; a missing user config file just yields
    /// the defaults. Environment overrides are applied and the result is
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.merge_env_from(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("Settings file not found: {}", path.display()),
            ));
        }
        let content = std::fs::read_to_string(path)
            .to_config_error(format!("Failed to read {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content).map_err(|e| {
            PipelineError::config_with_code(
                ErrorCode::CONFIG_INVALID_TOML,
                format!("Invalid settings file: {}", e),
            )
        })
    }

    /// Apply `PROMPTFLOW_*` overrides read through `lookup`
    pub fn merge_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), PipelineError> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(command) = var("AI_COMMAND") {
            self.ai_command = command;
        }
        if let Some(value) = var("MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = var("MAP_TIMEOUT_MS") {
            self.map_timeout_ms = Some(parse_env("MAP_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = var("RETRY_ATTEMPTS") {
            self.retry_attempts = parse_env("RETRY_ATTEMPTS", &value)?;
        }
        if let Some(dir) = var("TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("SKILLS_DIR") {
            self.skills_dir = PathBuf::from(dir);
        }
        if let Some(value) = var("RESULTS_FILE_THRESHOLD") {
            self.results_file_threshold = parse_env("RESULTS_FILE_THRESHOLD", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_concurrency == 0 {
            return Err(PipelineError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "max_concurrency must be at least 1",
            ));
        }
        if self.ai_command.trim().is_empty() {
            return Err(PipelineError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "ai_command must not be empty",
            ));
        }
        if self.map_timeout_ms == Some(0) {
            return Err(PipelineError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "map_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn map_timeout(&self) -> Option<Duration> {
        self.map_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, PipelineError> {
    value.trim().parse().map_err(|_| {
        PipelineError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!("{}{} has an invalid value: '{}'", ENV_PREFIX, name, value),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.ai_command, "claude -p");
        assert_eq!(settings.max_concurrency, 5);
        assert_eq!(settings.retry_attempts, 0);
        assert_eq!(settings.skills_dir, PathBuf::from(".github/skills"));
        assert!(settings.map_timeout().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml("max_concurrency = 8\nmap_timeout_ms = 30000\n").unwrap();
        assert_eq!(settings.max_concurrency, 8);
        assert_eq!(settings.map_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.ai_command, DEFAULT_AI_COMMAND);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Settings::from_toml("max_concurrency = \"many\"").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_TOML);
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let temp = TempDir::new().unwrap();
        let err = Settings::load(Some(&temp.path().join("missing.toml"))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_NOT_FOUND);

        let path = temp.path().join("config.toml");
        std::fs::write(&path, "ai_command = \"my-ai --json\"\n").unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.ai_command, "my-ai --json");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROMPTFLOW_MAX_CONCURRENCY", "3"),
            ("PROMPTFLOW_AI_COMMAND", "other-ai"),
            ("PROMPTFLOW_SKILLS_DIR", "skills"),
        ]
        .into_iter()
        .collect();
        let mut settings = Settings::default();
        settings
            .merge_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.max_concurrency, 3);
        assert_eq!(settings.ai_command, "other-ai");
        assert_eq!(settings.skills_dir, PathBuf::from("skills"));
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .merge_env_from(|key| (key == "PROMPTFLOW_RETRY_ATTEMPTS").then(|| "x".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency_and_empty_command() {
        let settings = Settings {
            max_concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            ai_command: "  ".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
