//! Configuration command handlers

use crate::cli::CommandContext;
use anyhow::{Context, Result};
use tideline_core::models::{EngineConfig, LogLevel};

/// Write the configuration file, keeping values that are already present
pub async fn handle_config_init(context: CommandContext) -> Result<()> {
    let config_path = context.config_path()?;

    println!("⚙️  Initializing tideline configuration");
    println!("📄 Config file: {}", config_path.display());

    let existing = config_path.exists();
    let mut config = EngineConfig::load_from_file(&config_path)
        .context("Failed to load existing config")?;
    if existing {
        println!("⚠️  Configuration file already exists. Keeping existing values...");
    } else {
        println!("✨ Creating new configuration with defaults...");
    }

    context.apply_overrides(&mut config);
    config.store_path = Some(config.resolved_store_path());

    match config.validate() {
        Ok(()) => println!("✅ Configuration is valid"),
        Err(errors) => {
            println!("❌ Configuration validation failed:");
            for error in &errors {
                println!("   - {}", error);
            }
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    config
        .save_to_file(&config_path)
        .context("Failed to save configuration")?;

    println!("✅ Configuration saved");
    println!();
    println!("   Namespace:            {}", config.namespace);
    println!("   Log level:            {}", log_level_name(config.log_level));
    println!("   Store:                {}", config.resolved_store_path().display());
    println!("   Lease timeout:        {} ms", config.lease_timeout_ms);
    println!("   Max conflict retries: {}", config.max_conflict_retries);
    println!("   Default policy:       {}", config.default_reuse_policy);

    Ok(())
}

fn log_level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
