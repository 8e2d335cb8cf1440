//! Workflow-ID reuse resolution
//!
//! Decides what happens when a start request names a workflow ID that already
//! has a run. The decision is pure: it reads a possibly stale snapshot of the
//! current run and never takes a lease, so it is safe to call speculatively.

use crate::error::{EngineError, EngineResult};
use crate::models::execution::{ExecutionState, ExecutionStatus, WorkflowIdReusePolicy};
use crate::workflow::action::UpdateWorkflowAction;

fn already_running_message(workflow_id: &str, run_id: &str) -> String {
    format!(
        "Workflow execution is already running. WorkflowId: {}, RunId: {}.",
        workflow_id, run_id
    )
}

fn finished_successfully_message(workflow_id: &str, run_id: &str) -> String {
    format!(
        "Workflow execution already finished successfully. WorkflowId: {}, RunId: {}. \
         Workflow Id reuse policy: allow duplicate workflow Id if last run failed.",
        workflow_id, run_id
    )
}

fn finished_reject_message(workflow_id: &str, run_id: &str) -> String {
    format!(
        "Workflow execution already finished. WorkflowId: {}, RunId: {}. \
         Workflow Id reuse policy: reject duplicate workflow Id.",
        workflow_id, run_id
    )
}

/// Resolve a workflow ID collision according to `policy`.
///
/// * `Ok(None)`: start the new run.
/// * `Ok(Some(action))`: apply `action` to the current run under its lease, then start.
/// * `Err(_)`: reject the start.
#[allow(clippy::too_many_arguments)]
pub fn resolve_duplicate_workflow_id(
    workflow_id: &str,
    new_run_id: &str,
    current_run_id: &str,
    current_state: ExecutionState,
    current_status: ExecutionStatus,
    current_start_request_id: &str,
    policy: WorkflowIdReusePolicy,
) -> EngineResult<Option<UpdateWorkflowAction>> {
    let already_started = |message: fn(&str, &str) -> String| {
        EngineError::already_started(
            message(workflow_id, current_run_id),
            current_start_request_id,
            current_run_id,
        )
    };

    let outcome = match current_state {
        ExecutionState::Created | ExecutionState::Running => match policy {
            WorkflowIdReusePolicy::TerminateIfRunning => Ok(Some(
                UpdateWorkflowAction::terminate_if_running(new_run_id),
            )),
            WorkflowIdReusePolicy::Unspecified
            | WorkflowIdReusePolicy::AllowDuplicate
            | WorkflowIdReusePolicy::AllowDuplicateFailedOnly
            | WorkflowIdReusePolicy::RejectDuplicate => Err(already_started(already_running_message)),
        },
        ExecutionState::Completed => match policy {
            WorkflowIdReusePolicy::AllowDuplicate | WorkflowIdReusePolicy::TerminateIfRunning => {
                Ok(None)
            }
            WorkflowIdReusePolicy::AllowDuplicateFailedOnly => {
                if current_status.is_failed() {
                    Ok(None)
                } else {
                    Err(already_started(finished_successfully_message))
                }
            }
            WorkflowIdReusePolicy::RejectDuplicate => Err(already_started(finished_reject_message)),
            WorkflowIdReusePolicy::Unspecified => Err(EngineError::Internal(format!(
                "Failed to process start workflow id reuse policy: {}.",
                policy
            ))),
        },
        ExecutionState::Unspecified
        | ExecutionState::Zombie
        | ExecutionState::Void
        | ExecutionState::Corrupted => Err(EngineError::Internal(format!(
            "Failed to process workflow, workflow has invalid state: {}.",
            current_state
        ))),
    };

    match &outcome {
        Ok(action) => tracing::debug!(
            workflow_id,
            current_run_id,
            new_run_id,
            state = %current_state,
            policy = %policy,
            mitigate = action.is_some(),
            "Workflow id reuse allowed"
        ),
        Err(EngineError::Internal(msg)) => tracing::error!(
            workflow_id,
            current_run_id,
            error = %msg,
            "Workflow id reuse resolution hit an unhandled case"
        ),
        Err(err) => tracing::debug!(
            workflow_id,
            current_run_id,
            policy = %policy,
            error = %err,
            "Workflow id reuse denied"
        ),
    }

    outcome
}
