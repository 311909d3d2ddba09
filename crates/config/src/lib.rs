//! Configuration loading and validation for Conductor.
//!
//! Loads `~/.conductor/config.toml` (or any path the embedder chooses),
//! applies `CONDUCTOR_*` environment overrides and validates the result
//! before any run starts.

use conductor_core::{AgentDefinition, PermissionMode, RuleSyntax};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model used for the top-level run and for subagents without an override
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Turn ceiling; unset means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    /// Cost ceiling in USD; unset means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,

    #[serde(default)]
    pub permission_mode: PermissionMode,

    /// Re-emit text and thinking deltas as they stream in
    #[serde(default)]
    pub include_partial_messages: bool,

    /// Working directory handed to tools; defaults to the process cwd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Capacity of the run's event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    #[serde(default)]
    pub tasks: TasksConfig,

    /// Per-model pricing overrides (model name → pricing)
    #[serde(default)]
    pub pricing: BTreeMap<String, PricingConfig>,

    /// Subagent types available to the delegation tool
    #[serde(default)]
    pub agents: BTreeMap<String, AgentDefinition>,

    /// Shell-command hooks
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_event_buffer() -> usize {
    64
}

/// Static allow/deny rules, e.g. `"Read"`, `"Bash(git status:*)"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,
}

/// Background task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Default wait for a blocking task-output request
    #[serde(default = "default_output_timeout_ms")]
    pub output_timeout_ms: u64,
}

fn default_output_timeout_ms() -> u64 {
    30_000
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            output_timeout_ms: default_output_timeout_ms(),
        }
    }
}

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
    /// Price per 1M cache-write tokens; defaults to 1.25x input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_per_m: Option<f64>,
    /// Price per 1M cache-read tokens; defaults to 0.1x input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_per_m: Option<f64>,
}

/// A hook that runs a shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Lifecycle event name, e.g. "pre_tool_use"
    pub event: String,

    /// Regex tested against the tool name; unset matches every tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,

    pub command: String,

    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
}

fn default_hook_timeout() -> u64 {
    30
}

impl RuntimeConfig {
    /// Load configuration from the default path (~/.conductor/config.toml),
    /// then apply environment overrides:
    /// - `CONDUCTOR_MODEL`
    /// - `CONDUCTOR_MAX_TURNS`
    /// - `CONDUCTOR_MAX_BUDGET_USD`
    /// - `CONDUCTOR_PERMISSION_MODE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration held in memory.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONDUCTOR_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("CONDUCTOR_MODEL") {
            self.model = model;
        }

        if let Some(turns) = lookup("CONDUCTOR_MAX_TURNS") {
            let turns = turns.parse::<u32>().map_err(|e| {
                ConfigError::ValidationError(format!("CONDUCTOR_MAX_TURNS '{turns}': {e}"))
            })?;
            self.max_turns = Some(turns);
        }

        if let Some(budget) = lookup("CONDUCTOR_MAX_BUDGET_USD") {
            let budget = budget.parse::<f64>().map_err(|e| {
                ConfigError::ValidationError(format!("CONDUCTOR_MAX_BUDGET_USD '{budget}': {e}"))
            })?;
            self.max_budget_usd = Some(budget);
        }

        if let Some(mode) = lookup("CONDUCTOR_PERMISSION_MODE") {
            self.permission_mode = mode.parse().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conductor")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == Some(0) {
            return Err(ConfigError::ValidationError("max_turns must be > 0".into()));
        }

        if let Some(budget) = self.max_budget_usd {
            if !(budget > 0.0) {
                return Err(ConfigError::ValidationError(
                    "max_budget_usd must be > 0".into(),
                ));
            }
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError("event_buffer must be > 0".into()));
        }

        for (model, price) in &self.pricing {
            let rates = [
                Some(price.input_per_m),
                Some(price.output_per_m),
                price.cache_write_per_m,
                price.cache_read_per_m,
            ];
            if rates.iter().flatten().any(|rate| *rate < 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "pricing for '{model}' must not be negative"
                )));
            }
        }

        // Syntax only; `PolicyGate::from_config` compiles the patterns.
        for rule in self.permissions.allow.iter().chain(&self.permissions.deny) {
            RuleSyntax::parse(rule).map_err(|e| {
                ConfigError::ValidationError(format!("permission rule '{rule}': {e}"))
            })?;
        }

        for hook in &self.hooks {
            if hook.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "hook for '{}' has an empty command",
                    hook.event
                )));
            }
            if let Some(matcher) = &hook.matcher {
                regex_lite::Regex::new(matcher).map_err(|e| {
                    ConfigError::ValidationError(format!("hook matcher '{matcher}': {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: None,
            max_turns: None,
            max_budget_usd: None,
            permission_mode: PermissionMode::default(),
            include_partial_messages: false,
            working_dir: None,
            event_buffer: default_event_buffer(),
            permissions: PermissionsConfig::default(),
            tasks: TasksConfig::default(),
            pricing: BTreeMap::new(),
            agents: BTreeMap::new(),
            hooks: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
