//! Execution identity, state and status models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Logical key of a workflow: unique among concurrently open runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    /// Namespace the workflow belongs to
    pub namespace: String,
    /// Caller-chosen workflow identifier
    pub workflow_id: String,
}

impl ExecutionKey {
    /// Create a new execution key
    pub fn new(namespace: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            workflow_id: workflow_id.into(),
        }
    }

    /// Attach a run ID to this key
    pub fn with_run(&self, run_id: impl Into<String>) -> WorkflowIdentity {
        WorkflowIdentity {
            namespace: self.namespace.clone(),
            workflow_id: self.workflow_id.clone(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.workflow_id)
    }
}

/// Identity of a single run of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowIdentity {
    pub namespace: String,
    pub workflow_id: String,
    /// Generated per start attempt
    pub run_id: String,
}

impl WorkflowIdentity {
    /// Identity for a fresh run with a newly generated run ID
    pub fn new_run(key: &ExecutionKey) -> Self {
        key.with_run(Uuid::new_v4().to_string())
    }

    /// The logical key without the run ID
    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(self.namespace.clone(), self.workflow_id.clone())
    }
}

impl fmt::Display for WorkflowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.workflow_id, self.run_id)
    }
}

/// Coarse lifecycle state of an execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Unspecified,
    /// Run exists but no workflow task has started yet
    Created,
    Running,
    Completed,
    /// Run exists in storage but is not the current run of its workflow ID
    Zombie,
    Void,
    Corrupted,
}

impl ExecutionState {
    /// Created and running executions are both considered open
    pub fn is_open(self) -> bool {
        matches!(self, ExecutionState::Created | ExecutionState::Running)
    }

    /// Whether `self -> next` is a legal forward transition
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        matches!(
            (self, next),
            (ExecutionState::Created, ExecutionState::Running)
                | (ExecutionState::Created, ExecutionState::Completed)
                | (ExecutionState::Running, ExecutionState::Completed)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Unspecified => "Unspecified",
            ExecutionState::Created => "Created",
            ExecutionState::Running => "Running",
            ExecutionState::Completed => "Completed",
            ExecutionState::Zombie => "Zombie",
            ExecutionState::Void => "Void",
            ExecutionState::Corrupted => "Corrupted",
        };
        f.write_str(name)
    }
}

/// Fine-grained status; a close status is only meaningful once completed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Unspecified,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

/// Close statuses treated as failures by `AllowDuplicateFailedOnly`
pub const FAILED_WORKFLOW_STATUSES: [ExecutionStatus; 4] = [
    ExecutionStatus::Failed,
    ExecutionStatus::Canceled,
    ExecutionStatus::Terminated,
    ExecutionStatus::TimedOut,
];

impl ExecutionStatus {
    pub fn is_failed(self) -> bool {
        FAILED_WORKFLOW_STATUSES.contains(&self)
    }

    /// Statuses a run may be closed with
    pub fn is_close_status(self) -> bool {
        !matches!(self, ExecutionStatus::Unspecified | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Unspecified => "Unspecified",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Canceled => "Canceled",
            ExecutionStatus::Terminated => "Terminated",
            ExecutionStatus::ContinuedAsNew => "ContinuedAsNew",
            ExecutionStatus::TimedOut => "TimedOut",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" | "completed" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "canceled" | "cancelled" => Ok(ExecutionStatus::Canceled),
            "terminated" => Ok(ExecutionStatus::Terminated),
            "continuedasnew" => Ok(ExecutionStatus::ContinuedAsNew),
            "timedout" | "timeout" => Ok(ExecutionStatus::TimedOut),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Caller-supplied rule for starting a workflow ID that already has a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowIdReusePolicy {
    Unspecified,
    #[default]
    AllowDuplicate,
    AllowDuplicateFailedOnly,
    RejectDuplicate,
    TerminateIfRunning,
}

impl fmt::Display for WorkflowIdReusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowIdReusePolicy::Unspecified => "Unspecified",
            WorkflowIdReusePolicy::AllowDuplicate => "AllowDuplicate",
            WorkflowIdReusePolicy::AllowDuplicateFailedOnly => "AllowDuplicateFailedOnly",
            WorkflowIdReusePolicy::RejectDuplicate => "RejectDuplicate",
            WorkflowIdReusePolicy::TerminateIfRunning => "TerminateIfRunning",
        };
        f.write_str(name)
    }
}

impl FromStr for WorkflowIdReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "allowduplicate" => Ok(WorkflowIdReusePolicy::AllowDuplicate),
            "allowduplicatefailedonly" => Ok(WorkflowIdReusePolicy::AllowDuplicateFailedOnly),
            "rejectduplicate" => Ok(WorkflowIdReusePolicy::RejectDuplicate),
            "terminateifrunning" => Ok(WorkflowIdReusePolicy::TerminateIfRunning),
            other => Err(format!("unknown workflow id reuse policy: {}", other)),
        }
    }
}

/// Request that created a run, used to recognise retried starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequestRecord {
    pub create_request_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

/// Snapshot of the current run for a workflow ID.
///
/// Readers must tolerate staleness: the run may have moved on by the time a
/// lease is acquired on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentExecution {
    pub run_id: String,
    pub state: ExecutionState,
    pub status: ExecutionStatus,
    pub start_request_id: String,
}

impl CurrentExecution {
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}
