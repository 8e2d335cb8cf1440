//! Configuration data structures

use crate::models::execution::WorkflowIdReusePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Namespace used when a request does not name one
    pub namespace: String,
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// Path of the JSON execution store (defaults to ~/.tideline/executions.json)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// How long to wait for a contended lease before giving up
    pub lease_timeout_ms: u64,
    /// Bound on re-resolution after losing a race with a concurrent update
    pub max_conflict_retries: u32,
    /// Policy applied when a start request does not carry one
    pub default_reuse_policy: WorkflowIdReusePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            log_level: LogLevel::Info,
            store_path: None,
            lease_timeout_ms: 5000,
            max_conflict_retries: 5,
            default_reuse_policy: WorkflowIdReusePolicy::AllowDuplicate,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if !path.exists() {
            return Ok(EngineConfig::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("tideline").join("config.toml"))
    }

    /// Configured store path, or the default under the home directory
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".tideline").join("executions.json")
        })
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.namespace.trim().is_empty() {
            errors.push("namespace cannot be empty".to_string());
        }

        if self.lease_timeout_ms == 0 {
            errors.push("lease_timeout_ms must be greater than 0".to_string());
        } else if self.lease_timeout_ms > 60_000 {
            errors.push("lease_timeout_ms cannot exceed 60000 (1 minute)".to_string());
        }

        if self.max_conflict_retries == 0 {
            errors.push("max_conflict_retries must be at least 1".to_string());
        } else if self.max_conflict_retries > 100 {
            errors.push("max_conflict_retries cannot exceed 100".to_string());
        }

        if self.default_reuse_policy == WorkflowIdReusePolicy::Unspecified {
            errors.push("default_reuse_policy must name a concrete policy".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
