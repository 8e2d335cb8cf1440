//! Deferred mutations applied to a leased run
//!
//! An [`UpdateWorkflowAction`] is built without touching storage, handed to
//! whoever holds the lease on the target run, and consumed exactly once by
//! [`UpdateWorkflowAction::apply`]. The returned [`ActionDirective`] tells the
//! committer what bookkeeping to do after the mutation.

use crate::error::EngineResult;
use crate::models::execution::ExecutionStatus;
use crate::models::mutable_state::MutableState;

/// Identity recorded on mutations the history service makes on its own behalf
pub const IDENTITY_HISTORY_SERVICE: &str = "history-service";

/// Reason recorded when a run is terminated to make room for a new one
pub const TERMINATE_IF_RUNNING_REASON: &str = "TerminateIfRunning WorkflowIdReusePolicy";

/// Post-action instruction for the lease committer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionDirective {
    /// Nothing changed; skip the commit
    Noop,
    /// Persist and schedule a new workflow task for the run
    UpdateWithNewWorkflowTask,
    /// Persist without scheduling a workflow task (close transitions)
    UpdateWithoutWorkflowTask,
}

impl ActionDirective {
    pub fn is_noop(self) -> bool {
        self == ActionDirective::Noop
    }

    pub fn creates_workflow_task(self) -> bool {
        self == ActionDirective::UpdateWithNewWorkflowTask
    }
}

/// A mutation waiting for a lease
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateWorkflowAction {
    /// Terminate the run so that `new_run_id` can start
    TerminateIfRunning { new_run_id: String },
    /// Operator-requested termination
    Terminate { reason: String, identity: String },
    /// Close the run with a completion status
    Complete {
        status: ExecutionStatus,
        payload: Option<serde_json::Value>,
    },
    /// First workflow task picked up by a worker
    StartWorkflowTask { identity: String },
}

impl UpdateWorkflowAction {
    pub fn terminate_if_running(new_run_id: impl Into<String>) -> Self {
        UpdateWorkflowAction::TerminateIfRunning {
            new_run_id: new_run_id.into(),
        }
    }

    pub fn terminate(reason: impl Into<String>, identity: impl Into<String>) -> Self {
        UpdateWorkflowAction::Terminate {
            reason: reason.into(),
            identity: identity.into(),
        }
    }

    pub fn complete(status: ExecutionStatus, payload: Option<serde_json::Value>) -> Self {
        UpdateWorkflowAction::Complete { status, payload }
    }

    pub fn start_workflow_task(identity: impl Into<String>) -> Self {
        UpdateWorkflowAction::StartWorkflowTask {
            identity: identity.into(),
        }
    }

    /// Apply the action to a leased run.
    ///
    /// Fails with [`crate::EngineError::WorkflowCompleted`] when the run closed
    /// after the action was decided on; callers re-resolve in that case.
    pub fn apply(self, mutable_state: &mut MutableState) -> EngineResult<ActionDirective> {
        match self {
            UpdateWorkflowAction::TerminateIfRunning { new_run_id } => {
                if !mutable_state.is_workflow_execution_running() {
                    return Err(crate::error::EngineError::WorkflowCompleted);
                }
                mutable_state.terminate(
                    TERMINATE_IF_RUNNING_REASON,
                    &format!("terminated by new runID: {}", new_run_id),
                    IDENTITY_HISTORY_SERVICE,
                    false,
                )?;
                tracing::info!(
                    run = %mutable_state.identity(),
                    new_run_id = %new_run_id,
                    "Terminated running execution for new run"
                );
                Ok(ActionDirective::UpdateWithoutWorkflowTask)
            }
            UpdateWorkflowAction::Terminate { reason, identity } => {
                mutable_state.terminate(&reason, "", &identity, true)?;
                tracing::info!(
                    run = %mutable_state.identity(),
                    identity = %identity,
                    "Terminated execution on request"
                );
                Ok(ActionDirective::UpdateWithoutWorkflowTask)
            }
            UpdateWorkflowAction::Complete { status, payload } => {
                mutable_state.complete(status, payload)?;
                tracing::info!(
                    run = %mutable_state.identity(),
                    status = %status,
                    "Execution closed"
                );
                Ok(ActionDirective::UpdateWithoutWorkflowTask)
            }
            UpdateWorkflowAction::StartWorkflowTask { identity } => {
                if mutable_state.start_workflow_task(&identity)? {
                    Ok(ActionDirective::UpdateWithoutWorkflowTask)
                } else {
                    Ok(ActionDirective::Noop)
                }
            }
        }
    }
}
