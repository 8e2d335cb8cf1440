//! Workflow lifecycle command handlers

use crate::cli::{parse_json_flag, CommandContext};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tideline_core::models::execution::{
    ExecutionKey, ExecutionState, ExecutionStatus, WorkflowIdReusePolicy,
};
use tideline_core::models::MutableState;
use tideline_core::services::logging::{log_error, log_lifecycle_event};
use tideline_core::workflow::StartWorkflowRequest;
use tideline_core::EngineError;

/// Summary line for one run
#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: String,
    state: ExecutionState,
    status: ExecutionStatus,
    reuse_policy: WorkflowIdReusePolicy,
    started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    closed_at: Option<String>,
    current: bool,
}

impl RunSummary {
    fn new(run: &MutableState, current_run_id: Option<&str>) -> Self {
        Self {
            run_id: run.run_id().to_string(),
            state: run.state(),
            status: run.status(),
            reuse_policy: run.reuse_policy(),
            started_at: timestamp(run.started_at()),
            closed_at: run.closed_at().map(timestamp),
            current: current_run_id == Some(run.run_id()),
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn engine_failure(err: EngineError, action: &str, key: &ExecutionKey) -> anyhow::Error {
    let context = format!("{} {}", action, key);
    log_error(&err.to_string(), Some(&context));
    anyhow::Error::new(err).context(format!("Failed to {} workflow {}", action, key))
}

/// Handle start command
pub async fn handle_start(
    context: CommandContext,
    workflow_id: String,
    policy: Option<WorkflowIdReusePolicy>,
    request_id: Option<String>,
    input: Option<String>,
    json: bool,
) -> Result<()> {
    let input = parse_json_flag("input", input)?;
    let orchestrator = context.orchestrator().await?;
    let key = orchestrator.key(&workflow_id);
    let policy = policy.unwrap_or(orchestrator.config().default_reuse_policy);
    let request_id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let response = orchestrator
        .start_workflow(StartWorkflowRequest {
            namespace: key.namespace.clone(),
            workflow_id: key.workflow_id.clone(),
            request_id: request_id.clone(),
            reuse_policy: policy,
            input,
        })
        .await
        .map_err(|err| engine_failure(err, "start", &key))?;

    let details = format!("run_id={} policy={}", response.run_id, policy);
    log_lifecycle_event("start", &key.to_string(), Some(&details));

    if json {
        let output = serde_json::json!({
            "namespace": key.namespace,
            "workflow_id": key.workflow_id,
            "run_id": response.run_id,
            "request_id": request_id,
            "started": response.started,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if response.started {
        println!("✅ Started workflow '{}'", key.workflow_id);
        println!("   Run ID:     {}", response.run_id);
        println!("   Request ID: {}", request_id);
        println!("   Policy:     {}", policy);
    } else {
        println!(
            "ℹ️  Request {} already started workflow '{}'",
            request_id, key.workflow_id
        );
        println!("   Run ID:     {}", response.run_id);
    }

    Ok(())
}

/// Handle complete command
pub async fn handle_complete(
    context: CommandContext,
    workflow_id: String,
    run_id: Option<String>,
    status: ExecutionStatus,
    result: Option<String>,
) -> Result<()> {
    let payload = parse_json_flag("result", result)?;
    let orchestrator = context.orchestrator().await?;
    let key = orchestrator.key(&workflow_id);

    orchestrator
        .complete_workflow(&key, run_id.as_deref(), status, payload)
        .await
        .map_err(|err| engine_failure(err, "complete", &key))?;

    log_lifecycle_event("complete", &key.to_string(), Some(&status.to_string()));
    println!("✅ Closed workflow '{}' as {}", key.workflow_id, status);

    Ok(())
}

/// Handle terminate command
pub async fn handle_terminate(
    context: CommandContext,
    workflow_id: String,
    run_id: Option<String>,
    reason: String,
    identity: String,
) -> Result<()> {
    let orchestrator = context.orchestrator().await?;
    let key = orchestrator.key(&workflow_id);

    orchestrator
        .terminate_workflow(&key, run_id.as_deref(), &reason, &identity)
        .await
        .map_err(|err| engine_failure(err, "terminate", &key))?;

    log_lifecycle_event("terminate", &key.to_string(), Some(&reason));
    println!("🛑 Terminated workflow '{}'", key.workflow_id);
    println!("   Reason:   {}", reason);
    println!("   Identity: {}", identity);

    Ok(())
}

/// Handle task-started command
pub async fn handle_task_started(
    context: CommandContext,
    workflow_id: String,
    run_id: Option<String>,
    identity: String,
) -> Result<()> {
    let orchestrator = context.orchestrator().await?;
    let key = orchestrator.key(&workflow_id);

    orchestrator
        .record_workflow_task_started(&key, run_id.as_deref(), &identity)
        .await
        .map_err(|err| engine_failure(err, "update", &key))?;

    log_lifecycle_event("task_started", &key.to_string(), Some(&identity));
    println!("▶️  Workflow '{}' is running", key.workflow_id);

    Ok(())
}

/// Handle describe command
pub async fn handle_describe(
    context: CommandContext,
    workflow_id: String,
    run_id: Option<String>,
    json: bool,
) -> Result<()> {
    let orchestrator = context.orchestrator().await?;
    let key = orchestrator.key(&workflow_id);

    let run = orchestrator
        .describe_workflow(&key, run_id.as_deref())
        .await
        .map_err(|err| engine_failure(err, "describe", &key))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!("Workflow Execution");
    println!("==================");
    println!("Workflow:      {}", key);
    println!("Run ID:        {}", run.run_id());
    println!("State:         {}", run.state());
    println!("Status:        {}", run.status());
    println!("Reuse Policy:  {}", run.reuse_policy());
    println!("Request ID:    {}", run.start_request().create_request_id);
    println!("Started At:    {}", timestamp(run.started_at()));
    if let Some(closed_at) = run.closed_at() {
        println!("Closed At:     {}", timestamp(closed_at));
    }
    if let Some(termination) = run.termination() {
        println!("Terminated By: {}", termination.identity);
        println!("Reason:        {}", termination.reason);
        if !termination.details.is_empty() {
            println!("Details:       {}", termination.details);
        }
    }

    println!();
    println!("History:");
    println!("--------");
    for event in run.history() {
        println!(
            "  {:>3}  {}  {}",
            event.event_id,
            timestamp(event.timestamp),
            event.attributes.event_type()
        );
    }

    Ok(())
}

/// Handle list command
pub async fn handle_list(context: CommandContext, workflow_id: String, json: bool) -> Result<()> {
    let orchestrator = context.orchestrator().await?;
    let key = orchestrator.key(&workflow_id);

    let current = orchestrator.store().current_execution(&key);
    let current_run_id = current.as_ref().map(|c| c.run_id.as_str());
    let runs: Vec<RunSummary> = orchestrator
        .list_runs(&key)
        .await
        .iter()
        .map(|run| RunSummary::new(run, current_run_id))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs found for workflow '{}'", key);
        return Ok(());
    }

    println!("Runs of {} ({} total)", key, runs.len());
    println!("{}", "-".repeat(60));
    for run in &runs {
        let marker = if run.current { "*" } else { " " };
        println!(
            "{} {}  {:<9} {:<14} {}",
            marker,
            run.run_id,
            run.state.to_string(),
            run.status.to_string(),
            run.started_at
        );
    }

    Ok(())
}
