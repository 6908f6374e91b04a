use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::llm::LlmConfig;
use crate::workflow::WorkflowEngineConfig;

/// Settings for durable-agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Workflow engine settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Reasoning-service settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Logger settings
    #[serde(default)]
    pub logger: LoggerSettings,

    /// Directory rendered reports are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            llm: LlmConfig::default(),
            logger: LoggerSettings::default(),
            output_dir: default_output_dir(),
        }
    }
}

/// Settings for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of task attempts executing at once
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Timeout of tool tasks in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    /// Directory holding one history file per instance
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            default_task_timeout_secs: default_task_timeout_secs(),
            history_dir: default_history_dir(),
        }
    }
}

impl EngineSettings {
    /// Engine configuration derived from these settings
    pub fn engine_config(&self) -> WorkflowEngineConfig {
        WorkflowEngineConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
        }
    }
}

/// Logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_concurrent_tasks() -> usize {
    16
}

fn default_task_timeout_secs() -> u64 {
    30
}

fn default_history_dir() -> PathBuf {
    PathBuf::from(".durable-agent/history")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Check values the engine cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "engine.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.engine.default_task_timeout_secs == 0 {
            return Err(Error::Config(
                "engine.default_task_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `LLM_API_KEY` and `LLM_MODEL` from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("LLM_API_KEY").ok(),
            std::env::var("LLM_MODEL").ok(),
        );
    }

    fn apply_overrides(&mut self, api_key: Option<String>, model: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            self.llm.model = model;
        }
    }
}

/// Load settings from a YAML file
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let mut file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open config file: {}", e)))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

    let settings: Settings = serde_yaml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

    settings.validate()?;
    Ok(settings)
}

/// Get settings, optionally from a specific file, with environment overrides
pub fn get_settings(config_path: Option<&Path>) -> Result<Settings> {
    let mut settings = match config_path {
        Some(path) => load_settings(path)?,
        None => {
            let default_paths = ["durable_agent.config.yaml", "config/durable_agent.config.yaml"];

            match default_paths.iter().find(|p| Path::new(p).exists()) {
                Some(path) => load_settings(path)?,
                None => Settings::default(),
            }
        }
    };

    settings.apply_env_overrides();
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.engine.max_concurrent_tasks, 16);
        assert_eq!(settings.engine.default_task_timeout_secs, 30);
        assert_eq!(settings.logger.level, "info");
        assert_eq!(settings.llm.model, "openai/gpt-4o");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "engine:\n  max_concurrent_tasks: 4\nllm:\n  agent_model: openai/gpt-4.1-mini\noutput_dir: reports\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.engine.max_concurrent_tasks, 4);
        assert_eq!(settings.engine.history_dir, PathBuf::from(".durable-agent/history"));
        assert_eq!(settings.llm.agent_model, "openai/gpt-4.1-mini");
        assert_eq!(settings.output_dir, PathBuf::from("reports"));
        assert_eq!(settings.engine.engine_config().max_concurrent_tasks, 4);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let dir = std::env::temp_dir().join(format!("durable-agent-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.yaml");
        std::fs::write(&path, "engine:\n  max_concurrent_tasks: 0\n").unwrap();

        let err = load_settings(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(load_settings(dir.join("missing.yaml")).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(Some("sk-test".into()), Some(String::new()));
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.llm.model, "openai/gpt-4o");

        settings.apply_overrides(None, Some("openai/gpt-4.1".into()));
        assert_eq!(settings.llm.model, "openai/gpt-4.1");
    }
}
