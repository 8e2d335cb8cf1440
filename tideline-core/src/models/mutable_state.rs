//! In-memory projection of one run's history
//!
//! A [`MutableState`] is only ever mutated through a held lease. Every mutator
//! validates the state transition first and returns an [`EngineError`] rather
//! than leaving the run half-updated.

use crate::error::{EngineError, EngineResult};
use crate::models::execution::{
    CurrentExecution, ExecutionState, ExecutionStatus, StartRequestRecord, WorkflowIdReusePolicy,
    WorkflowIdentity,
};
use crate::models::history::{EventAttributes, HistoryEvent, TerminationRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full state of a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutableState {
    identity: WorkflowIdentity,
    state: ExecutionState,
    status: ExecutionStatus,
    start_request: StartRequestRecord,
    reuse_policy: WorkflowIdReusePolicy,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    closed_at: Option<DateTime<Utc>>,
    history: Vec<HistoryEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    termination: Option<TerminationRecord>,
    workflow_task_pending: bool,
    /// Incremented on every commit
    version: u64,
}

impl MutableState {
    /// State of a brand new run: `Created`, with its first workflow task scheduled
    pub fn new(
        identity: WorkflowIdentity,
        create_request_id: impl Into<String>,
        reuse_policy: WorkflowIdReusePolicy,
        input: Option<serde_json::Value>,
        previous_run_id: Option<String>,
    ) -> Self {
        let create_request_id = create_request_id.into();
        let start_request = StartRequestRecord {
            create_request_id: create_request_id.clone(),
            workflow_id: identity.workflow_id.clone(),
            run_id: identity.run_id.clone(),
        };

        let mut state = Self {
            identity,
            state: ExecutionState::Created,
            status: ExecutionStatus::Running,
            start_request,
            reuse_policy,
            started_at: Utc::now(),
            closed_at: None,
            history: Vec::new(),
            termination: None,
            workflow_task_pending: false,
            version: 0,
        };

        state.add_event(EventAttributes::WorkflowExecutionStarted {
            create_request_id,
            reuse_policy,
            input,
            previous_run_id,
        });
        state.schedule_workflow_task();
        state
    }

    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    pub fn run_id(&self) -> &str {
        &self.identity.run_id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn start_request(&self) -> &StartRequestRecord {
        &self.start_request
    }

    pub fn reuse_policy(&self) -> WorkflowIdReusePolicy {
        self.reuse_policy
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub fn termination(&self) -> Option<&TerminationRecord> {
        self.termination.as_ref()
    }

    pub fn has_pending_workflow_task(&self) -> bool {
        self.workflow_task_pending
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Open runs (created or running) still accept mutations
    pub fn is_workflow_execution_running(&self) -> bool {
        self.state.is_open()
    }

    /// Event ID the next appended event will receive
    pub fn next_event_id(&self) -> i64 {
        self.history.len() as i64 + 1
    }

    /// Snapshot used to refresh the current-run pointer
    pub fn current_execution(&self) -> CurrentExecution {
        CurrentExecution {
            run_id: self.identity.run_id.clone(),
            state: self.state,
            status: self.status,
            start_request_id: self.start_request.create_request_id.clone(),
        }
    }

    /// Move a created run to running. Returns false if it was already running.
    pub fn start_workflow_task(&mut self, identity: &str) -> EngineResult<bool> {
        match self.state {
            ExecutionState::Running => Ok(false),
            ExecutionState::Created => {
                self.transition(ExecutionState::Running, ExecutionStatus::Running)?;
                self.workflow_task_pending = false;
                self.add_event(EventAttributes::WorkflowTaskStarted {
                    identity: identity.to_string(),
                });
                Ok(true)
            }
            _ => Err(EngineError::WorkflowCompleted),
        }
    }

    /// Append a scheduled workflow task unless one is already pending or the run is closed
    pub fn schedule_workflow_task(&mut self) {
        if self.workflow_task_pending || !self.is_workflow_execution_running() {
            return;
        }
        self.workflow_task_pending = true;
        self.add_event(EventAttributes::WorkflowTaskScheduled);
    }

    /// Close the run as terminated
    pub fn terminate(
        &mut self,
        reason: &str,
        details: &str,
        identity: &str,
        user_initiated: bool,
    ) -> EngineResult<()> {
        if !self.is_workflow_execution_running() {
            return Err(EngineError::WorkflowCompleted);
        }
        self.transition(ExecutionState::Completed, ExecutionStatus::Terminated)?;
        self.add_event(EventAttributes::WorkflowExecutionTerminated {
            reason: reason.to_string(),
            details: details.to_string(),
            identity: identity.to_string(),
            user_initiated,
        });
        self.termination = Some(TerminationRecord {
            reason: reason.to_string(),
            details: details.to_string(),
            identity: identity.to_string(),
            user_initiated,
        });
        self.close();
        Ok(())
    }

    /// Close the run with a non-terminate close status
    pub fn complete(
        &mut self,
        status: ExecutionStatus,
        payload: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        let attributes = match status {
            ExecutionStatus::Succeeded => {
                EventAttributes::WorkflowExecutionCompleted { result: payload }
            }
            ExecutionStatus::Failed => {
                EventAttributes::WorkflowExecutionFailed { failure: payload }
            }
            ExecutionStatus::Canceled => EventAttributes::WorkflowExecutionCanceled,
            ExecutionStatus::TimedOut => EventAttributes::WorkflowExecutionTimedOut,
            ExecutionStatus::ContinuedAsNew => EventAttributes::WorkflowExecutionContinuedAsNew,
            ExecutionStatus::Terminated
            | ExecutionStatus::Running
            | ExecutionStatus::Unspecified => {
                return Err(EngineError::InvalidArgument(format!(
                    "{} is not a valid completion status",
                    status
                )));
            }
        };

        if !self.is_workflow_execution_running() {
            return Err(EngineError::WorkflowCompleted);
        }
        self.transition(ExecutionState::Completed, status)?;
        self.add_event(attributes);
        self.close();
        Ok(())
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    fn transition(
        &mut self,
        to_state: ExecutionState,
        to_status: ExecutionStatus,
    ) -> EngineResult<()> {
        let status_ok = match to_state {
            ExecutionState::Completed => to_status.is_close_status(),
            _ => to_status == ExecutionStatus::Running,
        };
        if !self.state.can_transition_to(to_state) || !status_ok {
            return Err(EngineError::InvalidTransition {
                from_state: self.state,
                from_status: self.status,
                to_state,
                to_status,
            });
        }
        tracing::debug!(
            run = %self.identity,
            from = %self.state,
            to = %to_state,
            status = %to_status,
            "Execution state transition"
        );
        self.state = to_state;
        self.status = to_status;
        Ok(())
    }

    fn close(&mut self) {
        self.workflow_task_pending = false;
        self.closed_at = Some(Utc::now());
    }

    fn add_event(&mut self, attributes: EventAttributes) {
        let event = HistoryEvent {
            event_id: self.next_event_id(),
            timestamp: Utc::now(),
            attributes,
        };
        self.history.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::execution::ExecutionKey;

    fn new_state() -> MutableState {
        let identity = ExecutionKey::new("default", "order-42").with_run("run-1");
        MutableState::new(
            identity,
            "req-1",
            WorkflowIdReusePolicy::AllowDuplicate,
            None,
            None,
        )
    }

    #[test]
    fn test_new_run_is_created_with_pending_task() {
        let state = new_state();
        assert_eq!(state.state(), ExecutionState::Created);
        assert_eq!(state.status(), ExecutionStatus::Running);
        assert!(state.is_workflow_execution_running());
        assert!(state.has_pending_workflow_task());
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history()[0].event_id, 1);
        assert_eq!(state.history()[1].event_id, 2);
        assert_eq!(state.start_request().create_request_id, "req-1");
        assert_eq!(state.start_request().run_id, "run-1");
    }

    #[test]
    fn test_start_workflow_task_moves_to_running_once() {
        let mut state = new_state();
        assert!(state.start_workflow_task("worker-1").unwrap());
        assert_eq!(state.state(), ExecutionState::Running);
        assert!(!state.has_pending_workflow_task());
        assert!(!state.start_workflow_task("worker-1").unwrap());
    }

    #[test]
    fn test_terminate_closes_run() {
        let mut state = new_state();
        state.start_workflow_task("worker-1").unwrap();
        state
            .terminate("manual", "operator asked", "cli", true)
            .unwrap();

        assert_eq!(state.state(), ExecutionState::Completed);
        assert_eq!(state.status(), ExecutionStatus::Terminated);
        assert!(state.closed_at().is_some());
        let termination = state.termination().unwrap();
        assert!(termination.user_initiated);
        assert_eq!(termination.identity, "cli");

        let err = state.terminate("again", "", "cli", true).unwrap_err();
        assert_eq!(err, EngineError::WorkflowCompleted);
    }

    #[test]
    fn test_complete_rejects_terminated_status() {
        let mut state = new_state();
        let err = state.complete(ExecutionStatus::Terminated, None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert!(state.is_workflow_execution_running());
    }

    #[test]
    fn test_complete_from_created() {
        let mut state = new_state();
        state
            .complete(ExecutionStatus::Failed, Some(serde_json::json!({"cause": "boom"})))
            .unwrap();
        assert_eq!(state.status(), ExecutionStatus::Failed);
        assert!(matches!(
            state.history().last().unwrap().attributes,
            EventAttributes::WorkflowExecutionFailed { .. }
        ));
        assert_eq!(
            state.complete(ExecutionStatus::Succeeded, None).unwrap_err(),
            EngineError::WorkflowCompleted
        );
    }

    #[test]
    fn test_closed_run_does_not_schedule_tasks() {
        let mut state = new_state();
        state.complete(ExecutionStatus::Succeeded, None).unwrap();
        let events = state.history().len();
        state.schedule_workflow_task();
        assert_eq!(state.history().len(), events);
        assert!(!state.has_pending_workflow_task());
    }
}
