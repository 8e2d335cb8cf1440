mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{handlers, workflow_handlers, CommandContext};
use std::path::PathBuf;
use tideline_core::models::execution::{ExecutionStatus, WorkflowIdReusePolicy};

#[derive(Parser)]
#[command(name = "tideline")]
#[command(version = "0.1.0")]
#[command(about = "Durable workflow execution engine")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Path to configuration file (default: <config dir>/tideline/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the execution store, overriding the configured one
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Namespace, overriding the configured one
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a workflow run
    ///
    /// When the workflow ID already has a run, the reuse policy decides
    /// whether the start is rejected, admitted, or terminates the running run.
    ///
    /// Policies:
    ///   allow-duplicate              start unless a run is open
    ///   allow-duplicate-failed-only  start only if the last run failed
    ///   reject-duplicate             never reuse the workflow ID
    ///   terminate-if-running         terminate an open run, then start
    ///
    /// Examples:
    ///   tideline start order-42
    ///   tideline start order-42 --policy terminate-if-running --input '{"sku": 7}'
    Start {
        /// Workflow ID
        workflow_id: String,

        /// Workflow ID reuse policy (default: from configuration)
        #[arg(short, long)]
        policy: Option<WorkflowIdReusePolicy>,

        /// Request ID; repeat it to retry a start idempotently (default: random)
        #[arg(short, long)]
        request_id: Option<String>,

        /// Workflow input as a JSON document
        #[arg(short, long)]
        input: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Close a run with a completion status
    Complete {
        /// Workflow ID
        workflow_id: String,

        /// Run ID (default: the current run)
        #[arg(long)]
        run_id: Option<String>,

        /// Close status: succeeded, failed, canceled, timed-out or continued-as-new
        #[arg(short, long, default_value = "succeeded")]
        status: ExecutionStatus,

        /// Result or failure details as a JSON document
        #[arg(long)]
        result: Option<String>,
    },

    /// Terminate a run
    Terminate {
        /// Workflow ID
        workflow_id: String,

        /// Run ID (default: the current run)
        #[arg(long)]
        run_id: Option<String>,

        /// Termination reason
        #[arg(short, long, default_value = "terminated by operator")]
        reason: String,

        /// Operator identity
        #[arg(long, default_value = "cli-user")]
        identity: String,
    },

    /// Record that a worker picked up a run's workflow task
    TaskStarted {
        /// Workflow ID
        workflow_id: String,

        /// Run ID (default: the current run)
        #[arg(long)]
        run_id: Option<String>,

        /// Worker identity
        #[arg(long, default_value = "cli-worker")]
        identity: String,
    },

    /// Show a run's state and history
    Describe {
        /// Workflow ID
        workflow_id: String,

        /// Run ID (default: the current run)
        #[arg(long)]
        run_id: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List every run of a workflow ID, oldest first
    List {
        /// Workflow ID
        workflow_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file populated with defaults
    Config {
        /// Create or refresh the configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CommandContext::new(cli.config, cli.store, cli.namespace);

    match cli.command {
        Commands::Start {
            workflow_id,
            policy,
            request_id,
            input,
            json,
        } => {
            workflow_handlers::handle_start(context, workflow_id, policy, request_id, input, json)
                .await?;
        }
        Commands::Complete {
            workflow_id,
            run_id,
            status,
            result,
        } => {
            workflow_handlers::handle_complete(context, workflow_id, run_id, status, result)
                .await?;
        }
        Commands::Terminate {
            workflow_id,
            run_id,
            reason,
            identity,
        } => {
            workflow_handlers::handle_terminate(context, workflow_id, run_id, reason, identity)
                .await?;
        }
        Commands::TaskStarted {
            workflow_id,
            run_id,
            identity,
        } => {
            workflow_handlers::handle_task_started(context, workflow_id, run_id, identity).await?;
        }
        Commands::Describe {
            workflow_id,
            run_id,
            json,
        } => {
            workflow_handlers::handle_describe(context, workflow_id, run_id, json).await?;
        }
        Commands::List { workflow_id, json } => {
            workflow_handlers::handle_list(context, workflow_id, json).await?;
        }
        Commands::Config { init } => {
            if init {
                handlers::handle_config_init(context).await?;
            } else {
                println!("Config command requires --init flag");
                println!("Usage: tideline config --init [--config PATH]");
            }
        }
    }

    Ok(())
}
