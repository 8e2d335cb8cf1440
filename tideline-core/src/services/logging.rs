//! Logging service

use crate::models::LogLevel;
use tracing_subscriber::EnvFilter;

/// Directive string for the crates this workspace ships
pub fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "tideline=error,tideline_core=error",
        LogLevel::Warn => "tideline=warn,tideline_core=warn",
        LogLevel::Info => "tideline=info,tideline_core=info",
        LogLevel::Debug => "tideline=debug,tideline_core=debug",
        LogLevel::Trace => "tideline=trace,tideline_core=trace",
    }
}

/// Initialize logging with the specified level; `RUST_LOG` takes precedence when set
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()?;

    Ok(())
}

/// Log a lifecycle event issued by an operator or client
pub fn log_lifecycle_event(event_type: &str, workflow: &str, details: Option<&str>) {
    tracing::info!(
        event_type = event_type,
        workflow = workflow,
        details = details.unwrap_or(""),
        "Lifecycle event"
    );
}

/// Log a system error
pub fn log_error(error: &str, context: Option<&str>) {
    tracing::error!(
        error = error,
        context = context.unwrap_or(""),
        "System error occurred"
    );
}
