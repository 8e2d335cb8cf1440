//! CLI command handling

pub mod handlers;
pub mod workflow_handlers;

use anyhow::{Context, Result};
use std::path::PathBuf;
use thiserror::Error;
use tideline_core::models::EngineConfig;
use tideline_core::services::logging::init_logging;
use tideline_core::workflow::WorkflowOrchestrator;

/// Errors raised by the CLI before a request reaches the engine
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid configuration in {path}:\n  {}", .errors.join("\n  "))]
    InvalidConfig { path: String, errors: Vec<String> },

    #[error("--{flag} is not valid JSON: {source}")]
    InvalidJson {
        flag: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Global flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    config_path: Option<PathBuf>,
    store: Option<PathBuf>,
    namespace: Option<String>,
}

impl CommandContext {
    pub fn new(
        config_path: Option<PathBuf>,
        store: Option<PathBuf>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            config_path,
            store,
            namespace,
        }
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => EngineConfig::default_config_path(),
        }
    }

    /// Configuration file contents with the command-line overrides applied
    pub fn load_config(&self) -> Result<EngineConfig> {
        let path = self.config_path()?;
        let mut config = EngineConfig::load_from_file(&path)?;
        self.apply_overrides(&mut config);

        config.validate().map_err(|errors| CliError::InvalidConfig {
            path: path.display().to_string(),
            errors,
        })?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(store) = &self.store {
            config.store_path = Some(store.clone());
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
    }

    /// Load configuration, start logging and open the execution store
    pub async fn orchestrator(&self) -> Result<WorkflowOrchestrator> {
        let config = self.load_config()?;
        init_logging(config.log_level)
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        tracing::debug!(
            store = %config.resolved_store_path().display(),
            "Opening execution store"
        );

        WorkflowOrchestrator::from_config(config)
            .await
            .context("Failed to open execution store")
    }
}

/// Parse an optional JSON flag value
pub fn parse_json_flag(
    flag: &'static str,
    raw: Option<String>,
) -> Result<Option<serde_json::Value>, CliError> {
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|source| CliError::InvalidJson { flag, source })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        EngineConfig {
            namespace: "billing".to_string(),
            ..EngineConfig::default()
        }
        .save_to_file(&config_path)
        .unwrap();

        let context = CommandContext::new(
            Some(config_path.clone()),
            Some(dir.path().join("runs.json")),
            None,
        );
        let config = context.load_config().unwrap();
        assert_eq!(config.namespace, "billing");
        assert_eq!(config.store_path, Some(dir.path().join("runs.json")));

        let context = CommandContext::new(Some(config_path), None, Some("ops".to_string()));
        assert_eq!(context.load_config().unwrap().namespace, "ops");
    }

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "lease_timeout_ms = 0\nmax_conflict_retries = 0\n").unwrap();

        let err = CommandContext::new(Some(config_path), None, None)
            .load_config()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("lease_timeout_ms"));
        assert!(message.contains("max_conflict_retries"));
    }

    #[test]
    fn test_parse_json_flag() {
        assert_eq!(parse_json_flag("input", None).unwrap(), None);
        assert_eq!(
            parse_json_flag("input", Some(r#"{"sku": 7}"#.to_string())).unwrap(),
            Some(serde_json::json!({ "sku": 7 }))
        );
        let err = parse_json_flag("input", Some("{not json".to_string())).unwrap_err();
        assert!(err.to_string().starts_with("--input is not valid JSON"));
    }
}
