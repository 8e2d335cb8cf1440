//! History events recorded against a run

use crate::models::execution::WorkflowIdReusePolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in a run's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Strictly increasing within a run, starting at 1
    pub event_id: i64,
    pub timestamp: DateTime<Utc>,
    pub attributes: EventAttributes,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        create_request_id: String,
        reuse_policy: WorkflowIdReusePolicy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        /// Run this one replaced, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_run_id: Option<String>,
    },
    WorkflowTaskScheduled,
    WorkflowTaskStarted {
        identity: String,
    },
    WorkflowExecutionCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    WorkflowExecutionFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<serde_json::Value>,
    },
    WorkflowExecutionCanceled,
    WorkflowExecutionTimedOut,
    WorkflowExecutionContinuedAsNew,
    WorkflowExecutionTerminated {
        reason: String,
        details: String,
        identity: String,
        user_initiated: bool,
    },
}

impl EventAttributes {
    /// Short name used in logs and CLI output
    pub fn event_type(&self) -> &'static str {
        match self {
            EventAttributes::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            EventAttributes::WorkflowTaskScheduled => "WorkflowTaskScheduled",
            EventAttributes::WorkflowTaskStarted { .. } => "WorkflowTaskStarted",
            EventAttributes::WorkflowExecutionCompleted { .. } => "WorkflowExecutionCompleted",
            EventAttributes::WorkflowExecutionFailed { .. } => "WorkflowExecutionFailed",
            EventAttributes::WorkflowExecutionCanceled => "WorkflowExecutionCanceled",
            EventAttributes::WorkflowExecutionTimedOut => "WorkflowExecutionTimedOut",
            EventAttributes::WorkflowExecutionContinuedAsNew => "WorkflowExecutionContinuedAsNew",
            EventAttributes::WorkflowExecutionTerminated { .. } => "WorkflowExecutionTerminated",
        }
    }
}

/// Why and by whom a run was terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationRecord {
    pub reason: String,
    pub details: String,
    pub identity: String,
    pub user_initiated: bool,
}
