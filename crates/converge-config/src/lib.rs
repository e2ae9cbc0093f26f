use chrono::{DateTime, Utc};
use converge_core::{ConvergeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Configuration for a single agent run, built once from CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: Uuid,
    pub prompt: String,
    pub max_turns: usize,
    pub system_prompt: String,
    pub cwd: PathBuf,
    pub permission_mode: String,
    pub created_at: DateTime<Utc>,
}

impl RunConfig {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            prompt: prompt.into(),
            max_turns: default_max_turns(),
            system_prompt: default_system_prompt(),
            cwd: default_cwd(),
            permission_mode: default_permission_mode(),
            created_at: Utc::now(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_permission_mode(mut self, permission_mode: impl Into<String>) -> Self {
        self.permission_mode = permission_mode.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(ConvergeError::ConfigError("Prompt cannot be empty".into()));
        }
        if self.max_turns == 0 {
            return Err(ConvergeError::ConfigError(
                "Max turns must be at least 1".into(),
            ));
        }
        // The permission mode is an open string owned by the backend; only
        // emptiness is rejected here.
        if self.permission_mode.is_empty() {
            return Err(ConvergeError::ConfigError(
                "Permission mode cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Ambient settings loadable from a YAML file; every field has a default so
/// the binary runs without one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergeConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub pricing: PricingSettings,
    #[serde(default)]
    pub recorder: RecorderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Program spawned as the agent backend.
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,
    /// Tool names the backend is allowed to use.
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default = "default_input_per_1k")]
    pub input_per_1k: f64,
    #[serde(default = "default_output_per_1k")]
    pub output_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSettings {
    /// Namespace the run record is written to.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Record name; when unset the CLI layer resolves one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub app_name: Option<String>,
}

impl ConvergeConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConvergeError::ConfigError(format!("Failed to read config file: {e}"))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ConvergeConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ConvergeError::ConfigError(format!("Failed to parse YAML: {e}")))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.cli_path.as_os_str().is_empty() {
            return Err(ConvergeError::ConfigError(
                "Agent CLI path cannot be empty".into(),
            ));
        }
        if self.pricing.input_per_1k < 0.0 || self.pricing.output_per_1k < 0.0 {
            return Err(ConvergeError::ConfigError(
                "Pricing cannot be negative".into(),
            ));
        }
        if self.recorder.namespace.is_empty() {
            return Err(ConvergeError::ConfigError(
                "Recorder namespace cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            allowed_tools: default_allowed_tools(),
        }
    }
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            input_per_1k: default_input_per_1k(),
            output_per_1k: default_output_per_1k(),
            currency: default_currency(),
        }
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            app_name: None,
        }
    }
}

fn default_max_turns() -> usize {
    300
}
fn default_system_prompt() -> String {
    "You are a helpful assistant".to_string()
}
fn default_cwd() -> PathBuf {
    PathBuf::from("/app/source")
}
fn default_permission_mode() -> String {
    "acceptEdits".to_string()
}
fn default_cli_path() -> PathBuf {
    PathBuf::from("claude")
}
fn default_allowed_tools() -> Vec<String> {
    ["Read", "Edit", "Write", "Bash"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_input_per_1k() -> f64 {
    0.003
}
fn default_output_per_1k() -> f64 {
    0.015
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_namespace() -> String {
    "claude-test".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_reflects_provided_values() {
        let run = RunConfig::new("fix the bug")
            .with_max_turns(5)
            .with_system_prompt("You are terse")
            .with_cwd("/tmp/src")
            .with_permission_mode("plan");

        assert_eq!(run.prompt, "fix the bug");
        assert_eq!(run.max_turns, 5);
        assert_eq!(run.system_prompt, "You are terse");
        assert_eq!(run.cwd, PathBuf::from("/tmp/src"));
        assert_eq!(run.permission_mode, "plan");
        assert!(run.validate().is_ok());
    }

    #[test]
    fn run_config_defaults() {
        let run = RunConfig::new("hello");
        assert_eq!(run.max_turns, 300);
        assert_eq!(run.system_prompt, "You are a helpful assistant");
        assert_eq!(run.cwd, PathBuf::from("/app/source"));
        assert_eq!(run.permission_mode, "acceptEdits");
        assert!(run.validate().is_ok());
    }

    #[test]
    fn rejects_blank_prompt() {
        assert!(RunConfig::new("   ").validate().is_err());
    }

    #[test]
    fn rejects_zero_turns() {
        assert!(RunConfig::new("hi").with_max_turns(0).validate().is_err());
    }

    #[test]
    fn parses_yaml_config() {
        let yaml = r#"
agent:
  cli_path: /usr/local/bin/claude
  allowed_tools:
    - Read
    - Bash

pricing:
  input_per_1k: 0.004
  output_per_1k: 0.02

recorder:
  namespace: agents
  app_name: demo
"#;

        let config = ConvergeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.agent.cli_path, PathBuf::from("/usr/local/bin/claude"));
        assert_eq!(config.agent.allowed_tools, vec!["Read", "Bash"]);
        assert_eq!(config.pricing.input_per_1k, 0.004);
        assert_eq!(config.pricing.output_per_1k, 0.02);
        assert_eq!(config.recorder.namespace, "agents");
        assert_eq!(config.recorder.app_name.as_deref(), Some("demo"));
    }

    #[test]
    fn default_config_is_valid() {
        let config = ConvergeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.cli_path, PathBuf::from("claude"));
        assert_eq!(
            config.agent.allowed_tools,
            vec!["Read", "Edit", "Write", "Bash"]
        );
        assert_eq!(config.pricing.input_per_1k, 0.003);
        assert_eq!(config.pricing.output_per_1k, 0.015);
        assert_eq!(config.recorder.namespace, "claude-test");
        assert!(config.recorder.app_name.is_none());
    }

    #[test]
    fn rejects_negative_pricing() {
        let yaml = "pricing:\n  input_per_1k: -1.0\n";
        assert!(ConvergeConfig::from_yaml_str(yaml).is_err());
    }
}
