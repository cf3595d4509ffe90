//! Runtime configuration.
//!
//! Loaded from `<config_dir>/skycmd/config.toml`. Every field has a
//! default, so a missing file or an empty table yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::debug;

use crate::agent::automator::AutomatorConfig;
use crate::agent::context::ContextConfig;
use crate::agent::scheduler::SchedulerConfig;
use crate::safety::{ApprovalMode, OperationLimits};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub approval_mode: ApprovalMode,
    pub scheduler: SchedulerSettings,
    pub context: ContextSettings,
    pub automator: AutomatorSettings,
    pub safety: OperationLimits,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub api_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    /// Optional fallback model served by the same endpoint.
    pub fallback_model: Option<String>,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "SKYCMD_API_KEY".to_string(),
            model: "gpt-4o".to_string(),
            fallback_model: None,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub execution_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let config = SchedulerConfig::default();
        Self {
            max_concurrent: config.max_concurrent,
            execution_timeout_secs: config.execution_timeout.as_secs(),
            confirmation_timeout_secs: config.confirmation_timeout.as_secs(),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            execution_timeout: Duration::from_secs(settings.execution_timeout_secs),
            confirmation_timeout: Duration::from_secs(settings.confirmation_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_messages: usize,
    pub auto_compress: bool,
    pub compress_threshold: usize,
    pub preserve_recent: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        let config = ContextConfig::default();
        Self {
            max_messages: config.max_messages,
            auto_compress: config.auto_compress,
            compress_threshold: config.compress_threshold,
            preserve_recent: config.preserve_recent,
        }
    }
}

impl From<&ContextSettings> for ContextConfig {
    fn from(settings: &ContextSettings) -> Self {
        Self {
            max_messages: settings.max_messages,
            auto_compress: settings.auto_compress,
            compress_threshold: settings.compress_threshold,
            preserve_recent: settings.preserve_recent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomatorSettings {
    pub max_auto_turns: usize,
    pub turn_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub require_confirmation: bool,
}

impl Default for AutomatorSettings {
    fn default() -> Self {
        let config = AutomatorConfig::default();
        Self {
            max_auto_turns: config.max_auto_turns,
            turn_timeout_secs: config.turn_timeout.as_secs(),
            total_timeout_secs: config.total_timeout.as_secs(),
            require_confirmation: config.require_confirmation,
        }
    }
}

impl From<&AutomatorSettings> for AutomatorConfig {
    fn from(settings: &AutomatorSettings) -> Self {
        Self {
            max_auto_turns: settings.max_auto_turns,
            turn_timeout: Duration::from_secs(settings.turn_timeout_secs),
            total_timeout: Duration::from_secs(settings.total_timeout_secs),
            require_confirmation: settings.require_confirmation,
            completion_checker: None,
        }
    }
}

impl Settings {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("skycmd").join("config.toml"))
    }

    /// Load from the default location; missing file yields defaults.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
