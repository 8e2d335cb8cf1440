//! Engine error taxonomy
//!
//! Every failure the resolver, actions and leases can produce is an
//! [`EngineError`]. Callers branch on [`EngineError::kind`] rather than on
//! individual variants: conflicts go back to the client, benign races are
//! retried from a fresh snapshot, internal errors are surfaced as-is.

use crate::models::execution::{ExecutionState, ExecutionStatus};
use thiserror::Error;

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the execution lifecycle engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A start request collided with an existing run and the reuse policy denied it
    #[error("{message}")]
    WorkflowExecutionAlreadyStarted {
        message: String,
        start_request_id: String,
        run_id: String,
    },

    /// The leased run closed between resolution and lease acquisition
    #[error("workflow execution already completed")]
    WorkflowCompleted,

    /// The current-run pointer no longer names the expected run
    #[error(
        "current workflow condition failed for {namespace}/{workflow_id}: expected run {expected:?}, found {actual:?}"
    )]
    CurrentWorkflowConditionFailed {
        namespace: String,
        workflow_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// A state the engine cannot reason about
    #[error("{0}")]
    Internal(String),

    #[error("workflow execution not found: {namespace}/{workflow_id} (run {run_id:?})")]
    NotFound {
        namespace: String,
        workflow_id: String,
        run_id: Option<String>,
    },

    #[error("workflow execution {namespace}/{workflow_id}/{run_id} is already leased")]
    AlreadyLeased {
        namespace: String,
        workflow_id: String,
        run_id: String,
    },

    #[error(
        "timed out after {timeout_ms}ms waiting for lease on {namespace}/{workflow_id}/{run_id}"
    )]
    LeaseTimeout {
        namespace: String,
        workflow_id: String,
        run_id: String,
        timeout_ms: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid transition from {from_state}/{from_status} to {to_state}/{to_status}")]
    InvalidTransition {
        from_state: ExecutionState,
        from_status: ExecutionStatus,
        to_state: ExecutionState,
        to_status: ExecutionStatus,
    },

    #[error("gave up after {attempts} attempts racing concurrent updates")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Caller-visible classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Business conflict the client must handle
    Conflict,
    /// Optimistic-concurrency loss; re-resolve from a fresh snapshot
    BenignRace,
    /// Invariant violation; fix the code, do not retry
    Internal,
    NotFound,
    /// Lease contention or storage trouble; may succeed later
    Unavailable,
    InvalidArgument,
}

impl EngineError {
    /// Already-started conflict against the run `run_id`
    pub fn already_started(
        message: impl Into<String>,
        start_request_id: &str,
        run_id: &str,
    ) -> Self {
        EngineError::WorkflowExecutionAlreadyStarted {
            message: message.into(),
            start_request_id: start_request_id.to_string(),
            run_id: run_id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::WorkflowExecutionAlreadyStarted { .. } => ErrorKind::Conflict,
            EngineError::WorkflowCompleted
            | EngineError::CurrentWorkflowConditionFailed { .. } => ErrorKind::BenignRace,
            EngineError::Internal(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::ConflictRetriesExhausted { .. } => ErrorKind::Internal,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::AlreadyLeased { .. }
            | EngineError::LeaseTimeout { .. }
            | EngineError::Persistence(_) => ErrorKind::Unavailable,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    pub fn is_benign_race(&self) -> bool {
        self.kind() == ErrorKind::BenignRace
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::BenignRace | ErrorKind::Unavailable)
    }

    /// True when this conflict was caused by an earlier attempt of the same start request
    pub fn is_own_retry(&self, create_request_id: &str) -> bool {
        match self {
            EngineError::WorkflowExecutionAlreadyStarted {
                start_request_id, ..
            } => !create_request_id.is_empty() && start_request_id == create_request_id,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Persistence(format!("{:#}", err))
    }
}
